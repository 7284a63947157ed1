//! Polling admin view over the visitor listing.

use crate::client::LedgerClient;
use crate::ledger::{ListQuery, ListResponse, VisitorRecord, VisitorStats};
use crate::reporter::cache::VisitorCache;
use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use std::future::Future;
use tokio::time::{Duration, MissedTickBehavior, interval, timeout};
use tracing::{debug, warn};

/// Last known listing plus whether it is still current.
#[derive(Debug, Default)]
pub struct WatchView {
    listing: Option<ListResponse>,
    fetched_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl WatchView {
    /// A failed poll never discards the previous listing.
    pub fn apply(&mut self, result: Result<ListResponse, String>, at: DateTime<Utc>) {
        match result {
            Ok(listing) => {
                self.listing = Some(listing);
                self.fetched_at = Some(at);
                self.last_error = None;
            }
            Err(error) => {
                self.last_error = Some(error);
            }
        }
    }

    pub fn is_stale(&self) -> bool {
        self.listing.is_some() && self.last_error.is_some()
    }

    pub fn needs_fallback(&self) -> bool {
        self.listing.is_none() && self.last_error.is_some()
    }

    pub fn render(&self, fallback: &[VisitorRecord]) -> String {
        let mut out = String::new();

        match (&self.listing, &self.last_error) {
            (Some(listing), error) => {
                let fetched = self
                    .fetched_at
                    .map(format_local)
                    .unwrap_or_else(|| "-".to_string());
                out.push_str(&match error {
                    Some(error) => format!("STALE (last update {fetched}): {error}\n"),
                    None => format!("Updated {fetched}\n"),
                });
                out.push_str(&render_stats(&listing.stats));
                out.push_str(&render_table(&listing.visitors));
            }
            (None, Some(error)) => {
                out.push_str(&format!("Ledger unavailable: {error}\n"));
                out.push_str(&format!(
                    "Showing local fallback store ({} entries)\n",
                    fallback.len()
                ));
                out.push_str(&render_table(fallback));
            }
            (None, None) => out.push_str("Waiting for first listing...\n"),
        }

        out
    }
}

pub fn render_stats(stats: &VisitorStats) -> String {
    format!(
        "Total {} | Active {} | Today {}\n",
        stats.total, stats.active, stats.today
    )
}

pub fn render_table(visitors: &[VisitorRecord]) -> String {
    if visitors.is_empty() {
        return "No visitors.\n".to_string();
    }

    let mut out = format!(
        "{:<40} {:<16} {:<16} {:<10} {:<8} {:>7} {:>6}  {}\n",
        "IP", "CITY", "COUNTRY", "BROWSER", "OS", "BATTERY", "VISITS", "LAST VISIT"
    );

    for visitor in visitors {
        out.push_str(&format!(
            "{:<40} {:<16} {:<16} {:<10} {:<8} {:>7} {:>6}  {}\n",
            visitor.ip,
            truncate(&visitor.city, 16),
            truncate(&visitor.country, 16),
            truncate(&visitor.browser, 10),
            truncate(&visitor.os, 8),
            visitor.battery_level,
            visitor.visit_count,
            format_local(visitor.last_visit),
        ));
    }

    out
}

fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        value.to_string()
    } else {
        let mut cut = value.chars().take(width.saturating_sub(1)).collect::<String>();
        cut.push('~');
        cut
    }
}

fn format_local(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Runs `poll` once per tick. A poll that outlives its tick is cancelled, so
/// `on_result` only ever sees the latest completed response.
pub async fn run_polls<F, Fut, T, H>(
    period: Duration,
    rounds: Option<u64>,
    mut poll: F,
    mut on_result: H,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, String>>,
    H: FnMut(Result<T, String>),
{
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut completed = 0_u64;

    while rounds.is_none_or(|limit| completed < limit) {
        ticker.tick().await;

        let result = match timeout(period, poll()).await {
            Ok(result) => result,
            Err(_) => Err(format!(
                "listing did not complete within {}ms",
                period.as_millis()
            )),
        };

        if let Err(error) = &result {
            warn!(error = %error, "visitor listing poll failed");
        } else {
            debug!("visitor listing refreshed");
        }

        on_result(result);
        completed += 1;
    }
}

pub async fn watch<C: VisitorCache>(
    client: &LedgerClient,
    cache: &C,
    query: ListQuery,
    period: Duration,
) -> Result<()> {
    let mut view = WatchView::default();

    run_polls(
        period,
        None,
        move || async move { client.list(query).await.map_err(|error| error.to_string()) },
        |result| {
            view.apply(result, Utc::now());
            if view.is_stale() {
                debug!("showing last successful listing");
            }

            let fallback = if view.needs_fallback() {
                cache.entries().unwrap_or_else(|error| {
                    warn!(error = %format!("{error:#}"), "failed to read local fallback store");
                    Vec::new()
                })
            } else {
                Vec::new()
            };

            print!("\x1B[2J\x1B[H{}", view.render(&fallback));
        },
    )
    .await;

    Ok(())
}
