//! Visitor ledger: one record per client IP, counted and listed.

use crate::db::{Database, VisitInput, VisitorRow};
use anyhow::{Context, anyhow};
use chrono::{DateTime, Duration, Local, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

pub const PLACEHOLDER: &str = "-";
pub const UNKNOWN: &str = "Unknown";
pub const ACTIVE_WINDOW_MINUTES: i64 = 10;
pub const DEFAULT_LIMIT: u32 = 100;
pub const MAX_LIMIT: u32 = 1000;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("{0}")]
    InvalidInput(&'static str),

    #[error("storage unavailable: {0:#}")]
    Storage(#[from] anyhow::Error),
}

/// Submission body as it arrives on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VisitPayload {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_level: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewVisit {
    pub visitor_id: String,
    pub ip: String,
    pub city: String,
    pub country: String,
    pub browser: String,
    pub os: String,
    pub battery_level: String,
}

impl VisitPayload {
    pub fn validate(self) -> Result<NewVisit, LedgerError> {
        let visitor_id = required(self.id);
        let ip = required(self.ip);

        let (Some(visitor_id), Some(ip)) = (visitor_id, ip) else {
            return Err(LedgerError::InvalidInput("Missing required fields"));
        };

        Ok(NewVisit {
            visitor_id,
            ip,
            city: or_default(self.city, PLACEHOLDER),
            country: or_default(self.country, PLACEHOLDER),
            browser: or_default(self.browser, UNKNOWN),
            os: or_default(self.os, UNKNOWN),
            battery_level: or_default(self.battery_level, PLACEHOLDER),
        })
    }
}

fn required(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn or_default(value: Option<String>, fallback: &str) -> String {
    required(value).unwrap_or_else(|| fallback.to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VisitorRecord {
    #[serde(rename = "id")]
    pub visitor_id: String,
    pub ip: String,
    pub city: String,
    pub country: String,
    pub browser: String,
    pub os: String,
    pub battery_level: String,
    pub first_visit: DateTime<Utc>,
    pub last_visit: DateTime<Utc>,
    pub visit_count: i64,
}

impl VisitorRecord {
    fn from_row(row: VisitorRow) -> Result<Self, LedgerError> {
        Ok(Self {
            first_visit: from_millis(row.first_visit)?,
            last_visit: from_millis(row.last_visit)?,
            visitor_id: row.visitor_id,
            ip: row.ip,
            city: row.city,
            country: row.country,
            browser: row.browser,
            os: row.os,
            battery_level: row.battery_level,
            visit_count: row.visit_count,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VisitorStats {
    pub total: i64,
    pub active: i64,
    pub today: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VisitorListing {
    pub visitors: Vec<VisitorRecord>,
    pub stats: VisitorStats,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RecordResponse {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visit_count: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListResponse {
    pub success: bool,
    pub visitors: Vec<VisitorRecord>,
    pub stats: VisitorStats,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: String,
    pub total: i64,
    pub last_visit_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordedVisit {
    Created,
    Updated { visit_count: i64 },
}

impl RecordedVisit {
    pub fn visit_count(self) -> i64 {
        match self {
            Self::Created => 1,
            Self::Updated { visit_count } => visit_count,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Self::Created => "New visitor saved",
            Self::Updated { .. } => "Visitor updated",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListQuery {
    pub limit: u32,
    pub active_only: bool,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            active_only: false,
        }
    }
}

/// Validation happens before the database is touched, so rejected
/// submissions have no side effect.
pub fn record_visit(
    db_path: &Path,
    payload: VisitPayload,
    now: DateTime<Utc>,
) -> Result<RecordedVisit, LedgerError> {
    let visit = payload.validate()?;
    let database = Database::open(db_path)?;

    let visit_count = database.upsert_visitor(
        &VisitInput {
            visitor_id: &visit.visitor_id,
            ip: &visit.ip,
            city: &visit.city,
            country: &visit.country,
            browser: &visit.browser,
            os: &visit.os,
            battery_level: &visit.battery_level,
        },
        now.timestamp_millis(),
    )?;

    Ok(if visit_count <= 1 {
        RecordedVisit::Created
    } else {
        RecordedVisit::Updated { visit_count }
    })
}

pub fn list_visitors(
    db_path: &Path,
    query: ListQuery,
    now: DateTime<Utc>,
) -> Result<VisitorListing, LedgerError> {
    let limit = query.limit.clamp(1, MAX_LIMIT);
    let active_since = active_threshold(now);
    let (day_start, day_end) = local_day_bounds(now.with_timezone(&Local).date_naive())?;

    let database = Database::open(db_path)?;
    let visitors = database
        .list_visitors(limit, query.active_only.then_some(active_since))?
        .into_iter()
        .map(VisitorRecord::from_row)
        .collect::<Result<Vec<_>, _>>()?;
    let stats = database.visitor_stats(active_since, day_start, day_end)?;

    Ok(VisitorListing {
        visitors,
        stats: VisitorStats {
            total: stats.total,
            active: stats.active,
            today: stats.today,
        },
    })
}

pub fn latest_visit(db_path: &Path) -> Result<(i64, Option<DateTime<Utc>>), LedgerError> {
    let database = Database::open(db_path)?;
    let total = database.count_visitors()?;
    let latest = database
        .latest_visit_timestamp()?
        .map(from_millis)
        .transpose()?;

    Ok((total, latest))
}

fn active_threshold(now: DateTime<Utc>) -> i64 {
    (now - Duration::minutes(ACTIVE_WINDOW_MINUTES)).timestamp_millis()
}

/// Half-open `[start, end)` millisecond range of a server-local calendar day.
fn local_day_bounds(date: NaiveDate) -> anyhow::Result<(i64, i64)> {
    let start = local_midnight(date)?;
    let end = local_midnight(date + Duration::days(1))?;

    Ok((start, end))
}

fn local_midnight(date: NaiveDate) -> anyhow::Result<i64> {
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .context("Failed to build midnight timestamp")?;

    Local
        .from_local_datetime(&midnight)
        .earliest()
        .map(|datetime| datetime.timestamp_millis())
        .with_context(|| format!("Failed to convert local midnight for {date}"))
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>, LedgerError> {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| LedgerError::Storage(anyhow!("Stored timestamp out of range: {millis}")))
}
