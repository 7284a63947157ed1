use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "visitorhub",
    about = "Visitor ledger service and reporting client"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the ledger HTTP service.
    Serve {
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        bind: Option<String>,
    },
    /// Gather telemetry for this host and submit one visit.
    Report {
        #[arg(long)]
        user_agent: Option<String>,
        #[arg(long)]
        ip: Option<String>,
    },
    /// Print the visitor listing once.
    Visitors {
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long, default_value_t = false)]
        active: bool,
    },
    /// Re-fetch the visitor listing on an interval.
    Watch {
        #[arg(long)]
        interval: Option<u64>,
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long, default_value_t = false)]
        active: bool,
    },
    Status,
    Doctor,
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Debug, Subcommand)]
pub enum CacheCommands {
    List,
    Clear,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    Set { key: String, value: String },
    Get { key: String },
}
