pub mod battery;
pub mod cache;
pub mod lookup;
pub mod useragent;

use crate::client::LedgerClient;
use crate::config::Config;
use crate::ledger::{PLACEHOLDER, VisitPayload, VisitorRecord};
use crate::reporter::battery::{BatteryProbe, SysfsBattery, format_level};
use crate::reporter::cache::{JsonFileCache, VisitorCache};
use crate::reporter::lookup::ApproxLocation;
use crate::reporter::useragent::Telemetry;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportState {
    Idle,
    Gathering,
    Submitting,
    Recorded,
    LocallyCached,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportOutcome {
    Recorded { visit_count: i64 },
    LocallyCached { reason: String },
    Skipped,
}

#[derive(Debug, Clone, Default)]
pub struct ReportOptions {
    pub user_agent: String,
    pub ip: Option<String>,
}

pub struct Reporter<C, B> {
    ledger: LedgerClient,
    cache: C,
    battery: Arc<B>,
    ip_lookup_url: String,
    location_urls: Vec<String>,
    state: ReportState,
}

impl Reporter<JsonFileCache, SysfsBattery> {
    pub fn from_config(config: &Config) -> Result<Self> {
        let ledger = LedgerClient::new(
            &config.ledger_url,
            config.request_timeout_seconds,
            &config.user_agent,
        )
        .context("Failed to build ledger client")?;

        Ok(Self::new(
            ledger,
            JsonFileCache::new(&config.fallback_path, config.fallback_capacity),
            SysfsBattery::default(),
            config.ip_lookup_url.clone(),
            config.location_urls.clone(),
        ))
    }
}

impl<C: VisitorCache, B: BatteryProbe + 'static> Reporter<C, B> {
    pub fn new(
        ledger: LedgerClient,
        cache: C,
        battery: B,
        ip_lookup_url: String,
        location_urls: Vec<String>,
    ) -> Self {
        Self {
            ledger,
            cache,
            battery: Arc::new(battery),
            ip_lookup_url,
            location_urls,
            state: ReportState::Idle,
        }
    }

    pub fn state(&self) -> ReportState {
        self.state
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    fn transition(&mut self, next: ReportState) {
        debug!(from = ?self.state, to = ?next, "report state");
        self.state = next;
    }

    pub async fn report(&mut self, options: &ReportOptions, now: DateTime<Utc>) -> Result<ReportOutcome> {
        self.transition(ReportState::Gathering);
        let telemetry = useragent::classify(&options.user_agent);

        let http = self.ledger.http();
        let ip_override = options
            .ip
            .as_deref()
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .map(ToOwned::to_owned);

        let (ip, location, charge) = tokio::join!(
            async {
                match ip_override.as_deref() {
                    Some(ip) => Some(ip.to_string()),
                    None => lookup::fetch_public_ip(http, &self.ip_lookup_url).await,
                }
            },
            lookup::fetch_approx_location(http, &self.location_urls),
            read_battery(Arc::clone(&self.battery)),
        );

        let Some(ip) = ip else {
            warn!("public IP unavailable; visit not recorded");
            self.transition(ReportState::Skipped);
            return Ok(ReportOutcome::Skipped);
        };

        if let Some(location) = &location {
            debug!(
                region = %location.region,
                country_code = %location.country_code,
                timezone = %location.timezone,
                "approximate location"
            );
        }

        let record = assemble(ip, telemetry, location, charge, now);
        self.transition(ReportState::Submitting);

        match self.ledger.submit(&VisitPayload::from(&record)).await {
            Ok(response) if response.success => {
                let visit_count = response.visit_count.unwrap_or(1);
                info!(ip = %record.ip, visit_count, "visit recorded");
                self.transition(ReportState::Recorded);
                Ok(ReportOutcome::Recorded { visit_count })
            }
            Ok(response) => self.fall_back(record, response.message),
            Err(error) => self.fall_back(record, error.to_string()),
        }
    }

    fn fall_back(&mut self, record: VisitorRecord, reason: String) -> Result<ReportOutcome> {
        warn!(ip = %record.ip, reason = %reason, "ledger submission failed; caching locally");

        self.cache
            .upsert(record)
            .context("Failed to cache visit locally after ledger submission failed")?;
        self.transition(ReportState::LocallyCached);

        Ok(ReportOutcome::LocallyCached { reason })
    }
}

/// Sysfs reads block, so the probe runs off the async workers.
async fn read_battery<B: BatteryProbe + 'static>(battery: Arc<B>) -> Option<f64> {
    match tokio::task::spawn_blocking(move || battery.charge_fraction()).await {
        Ok(charge) => charge,
        Err(error) => {
            warn!(error = %error, "battery probe task failed");
            None
        }
    }
}

/// Substitutes placeholders for every telemetry source that came back empty.
pub fn assemble(
    ip: String,
    telemetry: Telemetry,
    location: Option<ApproxLocation>,
    charge: Option<f64>,
    now: DateTime<Utc>,
) -> VisitorRecord {
    let (city, country) = location
        .map(|location| (location.city, location.country))
        .unwrap_or_else(|| (PLACEHOLDER.to_string(), PLACEHOLDER.to_string()));

    VisitorRecord {
        visitor_id: format!("{ip}_{}", now.timestamp_millis()),
        ip,
        city,
        country,
        browser: telemetry.browser.label().to_string(),
        os: telemetry.os.label().to_string(),
        battery_level: format_level(charge),
        first_visit: now,
        last_visit: now,
        visit_count: 1,
    }
}

impl From<&VisitorRecord> for VisitPayload {
    fn from(record: &VisitorRecord) -> Self {
        Self {
            id: Some(record.visitor_id.clone()),
            ip: Some(record.ip.clone()),
            city: Some(record.city.clone()),
            country: Some(record.country.clone()),
            browser: Some(record.browser.clone()),
            os: Some(record.os.clone()),
            battery_level: Some(record.battery_level.clone()),
        }
    }
}
