mod api;
mod cli;
mod client;
mod config;
mod db;
mod ledger;
mod reporter;
mod watch;

use crate::cli::{CacheCommands, Cli, Commands, ConfigCommands};
use crate::client::LedgerClient;
use crate::config::Config;
use crate::db::Database;
use crate::ledger::{ListQuery, MAX_LIMIT};
use crate::reporter::battery::{BatteryProbe, SysfsBattery, format_level};
use crate::reporter::cache::{JsonFileCache, VisitorCache};
use crate::reporter::{ReportOptions, ReportOutcome, Reporter};
use anyhow::{Context, Result, bail};
use chrono::{Local, Utc};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port, bind } => handle_serve(port, bind).await,
        Commands::Report { user_agent, ip } => handle_report(user_agent, ip).await,
        Commands::Visitors { limit, active } => handle_visitors(limit, active).await,
        Commands::Watch {
            interval,
            limit,
            active,
        } => handle_watch(interval, limit, active).await,
        Commands::Status => handle_status().await,
        Commands::Doctor => handle_doctor().await,
        Commands::Cache { command } => handle_cache_command(command),
        Commands::Config { command } => handle_config_command(command),
    }
}

async fn handle_serve(port: Option<u16>, bind: Option<String>) -> Result<()> {
    let mut config = Config::load_or_default()?;
    if let Some(port) = port {
        config.api_port = port;
    }
    if let Some(bind) = bind {
        config.bind_address = bind;
    }

    config.ensure_bootstrap_files()?;
    let _ = Database::open(&config.db_path)?;

    info!(db = %config.db_path.display(), "visitor ledger starting");

    tokio::select! {
        api_result = api::run_server(Arc::new(config)) => {
            api_result?;
        }
        _ = signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    Ok(())
}

async fn handle_report(user_agent: Option<String>, ip: Option<String>) -> Result<()> {
    let config = Config::load_or_default()?;
    let mut reporter = Reporter::from_config(&config)?;
    let options = ReportOptions {
        user_agent: user_agent.unwrap_or_else(|| config.user_agent.clone()),
        ip,
    };

    match reporter.report(&options, Utc::now()).await? {
        ReportOutcome::Recorded { visit_count } => {
            println!("Visit recorded (visit count: {visit_count})");
        }
        ReportOutcome::LocallyCached { reason } => {
            println!("Ledger unavailable ({reason}); visit kept in local fallback store");
            println!("- fallback: {}", reporter.cache().path().display());
        }
        ReportOutcome::Skipped => {
            println!("Public IP unavailable; visit not recorded");
        }
    }

    Ok(())
}

async fn handle_visitors(limit: Option<u32>, active: bool) -> Result<()> {
    let config = Config::load_or_default()?;
    let client = ledger_client(&config)?;
    let query = list_query(&config, limit, active)?;

    let listing = client
        .list(query)
        .await
        .with_context(|| format!("Failed to fetch visitors from {}", config.ledger_url))?;

    print!("{}", watch::render_stats(&listing.stats));
    print!("{}", watch::render_table(&listing.visitors));

    Ok(())
}

async fn handle_watch(interval: Option<u64>, limit: Option<u32>, active: bool) -> Result<()> {
    let config = Config::load_or_default()?;
    let client = ledger_client(&config)?;
    let cache = fallback_cache(&config);
    let query = list_query(&config, limit, active)?;
    let seconds = interval.unwrap_or(config.poll_seconds);
    if seconds == 0 {
        bail!("--interval must be at least 1 second");
    }

    info!(seconds, url = %config.ledger_url, "watching visitor listing");

    tokio::select! {
        watch_result = watch::watch(&client, &cache, query, Duration::from_secs(seconds)) => {
            watch_result?;
        }
        _ = signal::ctrl_c() => {
            info!("watch stopped");
        }
    }

    Ok(())
}

async fn handle_status() -> Result<()> {
    let config = Config::load_or_default()?;
    let cache = fallback_cache(&config);

    println!("visitorhub status");
    println!("- config: {}", Config::config_path().display());
    println!("- ledger_url: {}", config.ledger_url);

    match ledger_client(&config)?.status().await {
        Ok(status) => {
            println!("- ledger: {}", status.status);
            println!("- visitors: {}", status.total);
            println!(
                "- last_visit_at: {}",
                status
                    .last_visit_at
                    .map(|at| at.with_timezone(&Local).to_rfc3339())
                    .unwrap_or_else(|| "none".to_string())
            );
        }
        Err(error) => println!("- ledger: unreachable ({error})"),
    }

    println!(
        "- fallback_entries: {}",
        cache.entries().map(|entries| entries.len()).unwrap_or(0)
    );

    Ok(())
}

async fn handle_doctor() -> Result<()> {
    let config_path = Config::config_path();
    let mut issues = Vec::new();

    if config_path.exists() {
        println!("[OK] config.json found: {}", config_path.display());
    } else {
        println!("[WARN] config.json not found, using defaults: {}", config_path.display());
        issues.push("config missing");
    }

    let config = Config::load_or_default()?;

    match Database::open(&config.db_path) {
        Ok(_) => println!("[OK] SQLite reachable: {}", config.db_path.display()),
        Err(error) => {
            println!("[WARN] SQLite check failed: {error:#}");
            issues.push("db unreachable");
        }
    }

    match Url::parse(&config.ledger_url) {
        Ok(_) => match ledger_client(&config)?.status().await {
            Ok(status) => println!("[OK] ledger reachable: {} ({})", config.ledger_url, status.status),
            Err(error) => {
                println!("[WARN] ledger unreachable: {error}");
                issues.push("ledger unreachable");
            }
        },
        Err(error) => {
            println!("[WARN] invalid ledger_url '{}': {error}", config.ledger_url);
            issues.push("invalid ledger_url");
        }
    }

    match fallback_cache(&config).entries() {
        Ok(entries) => println!(
            "[OK] fallback store readable: {} ({} entries)",
            config.fallback_path.display(),
            entries.len()
        ),
        Err(error) => {
            println!("[WARN] fallback store unreadable: {error:#}");
            issues.push("fallback store unreadable");
        }
    }

    let battery = SysfsBattery::default().charge_fraction();
    if battery.is_some() {
        println!("[OK] battery level available: {}", format_level(battery));
    } else {
        println!("[OK] battery level unavailable on this host; reports will use '-'");
    }

    if issues.is_empty() {
        println!("doctor result: no issues");
    } else {
        println!("doctor result: {} warning(s)", issues.len());
    }

    Ok(())
}

fn handle_cache_command(command: CacheCommands) -> Result<()> {
    let config = Config::load_or_default()?;
    let cache = fallback_cache(&config);

    match command {
        CacheCommands::List => {
            let entries = cache.entries()?;
            println!(
                "Local fallback store: {} ({} entries)",
                cache.path().display(),
                entries.len()
            );
            print!("{}", watch::render_table(&entries));
            Ok(())
        }
        CacheCommands::Clear => {
            cache.clear()?;
            println!("Local fallback store cleared: {}", cache.path().display());
            Ok(())
        }
    }
}

fn handle_config_command(command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Set { key, value } => {
            let mut config = Config::load_or_default()?;
            config.set_value(&key, &value)?;
            config.ensure_bootstrap_files()?;
            config.save()?;

            println!("Config saved: {key} = {value}");
            Ok(())
        }
        ConfigCommands::Get { key } => {
            let config = Config::load_or_default()?;
            let value = config
                .get_value(&key)
                .with_context(|| format!("Unsupported config key: {key}"))?;

            println!("{value}");
            Ok(())
        }
    }
}

fn ledger_client(config: &Config) -> Result<LedgerClient> {
    LedgerClient::new(
        &config.ledger_url,
        config.request_timeout_seconds,
        &config.user_agent,
    )
    .with_context(|| format!("Invalid ledger URL: {}", config.ledger_url))
}

fn fallback_cache(config: &Config) -> JsonFileCache {
    JsonFileCache::new(&config.fallback_path, config.fallback_capacity)
}

fn list_query(config: &Config, limit: Option<u32>, active: bool) -> Result<ListQuery> {
    let limit = limit.unwrap_or(config.list_limit);
    if limit == 0 {
        bail!("--limit must be a positive integer");
    }

    Ok(ListQuery {
        limit: limit.min(MAX_LIMIT),
        active_only: active,
    })
}
