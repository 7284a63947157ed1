pub mod queries;

use anyhow::{Context, Result};
use rusqlite::{Connection, Row, params};
use std::fs;
use std::path::Path;
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitorRow {
    pub visitor_id: String,
    pub ip: String,
    pub city: String,
    pub country: String,
    pub browser: String,
    pub os: String,
    pub battery_level: String,
    pub first_visit: i64,
    pub last_visit: i64,
    pub visit_count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsRow {
    pub total: i64,
    pub active: i64,
    pub today: i64,
}

#[derive(Debug, Clone)]
pub struct VisitInput<'a> {
    pub visitor_id: &'a str,
    pub ip: &'a str,
    pub city: &'a str,
    pub country: &'a str,
    pub browser: &'a str,
    pub os: &'a str,
    pub battery_level: &'a str,
}

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create DB directory: {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite DB: {}", path.display()))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .context("Failed to set SQLite busy timeout")?;

        let database = Self { conn };
        database.init_schema()?;

        Ok(database)
    }

    pub fn init_schema(&self) -> Result<()> {
        queries::schema_statements()
            .iter()
            .try_for_each(|statement| {
                self.conn
                    .execute(statement, [])
                    .context("Failed to initialize schema")
                    .map(|_| ())
            })
    }

    /// Returns the stored visit count after the write; 1 means the row was created.
    pub fn upsert_visitor(&self, visit: &VisitInput<'_>, seen_at: i64) -> Result<i64> {
        self.conn
            .query_row(
                queries::UPSERT_VISITOR,
                params![
                    visit.visitor_id,
                    visit.ip,
                    visit.city,
                    visit.country,
                    visit.browser,
                    visit.os,
                    visit.battery_level,
                    seen_at
                ],
                |row| row.get(0),
            )
            .with_context(|| format!("Failed to upsert visitor: {}", visit.ip))
    }

    #[cfg(test)]
    pub fn visitor_by_ip(&self, ip: &str) -> Result<Option<VisitorRow>> {
        use rusqlite::OptionalExtension;

        let sql = format!("{} WHERE ip = ?1", queries::SELECT_VISITOR_COLUMNS);

        self.conn
            .query_row(&sql, params![ip], map_visitor_row)
            .optional()
            .context("Failed to query visitor by ip")
    }

    pub fn list_visitors(&self, limit: u32, active_since: Option<i64>) -> Result<Vec<VisitorRow>> {
        let sql = format!(
            "{} WHERE last_visit >= ?1 ORDER BY last_visit DESC, id DESC LIMIT ?2",
            queries::SELECT_VISITOR_COLUMNS
        );
        let mut statement = self.conn.prepare(&sql)?;

        let rows = statement
            .query_map(
                params![active_since.unwrap_or(i64::MIN), i64::from(limit)],
                map_visitor_row,
            )?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list visitors")?;

        Ok(rows)
    }

    pub fn visitor_stats(&self, active_since: i64, day_start: i64, day_end: i64) -> Result<StatsRow> {
        self.conn
            .query_row(
                queries::SELECT_VISITOR_STATS,
                params![active_since, day_start, day_end],
                |row| {
                    Ok(StatsRow {
                        total: row.get(0)?,
                        active: row.get(1)?,
                        today: row.get(2)?,
                    })
                },
            )
            .context("Failed to compute visitor stats")
    }

    pub fn count_visitors(&self) -> Result<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM visitors", [], |row| row.get(0))
            .context("Failed to count visitors")
    }

    pub fn latest_visit_timestamp(&self) -> Result<Option<i64>> {
        self.conn
            .query_row("SELECT MAX(last_visit) FROM visitors", [], |row| row.get(0))
            .context("Failed to query latest visit")
    }
}

fn map_visitor_row(row: &Row<'_>) -> rusqlite::Result<VisitorRow> {
    Ok(VisitorRow {
        visitor_id: row.get(0)?,
        ip: row.get(1)?,
        city: row.get(2)?,
        country: row.get(3)?,
        browser: row.get(4)?,
        os: row.get(5)?,
        battery_level: row.get(6)?,
        first_visit: row.get(7)?,
        last_visit: row.get(8)?,
        visit_count: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::{Database, VisitInput};
    use tempfile::TempDir;

    fn visit<'a>(ip: &'a str, browser: &'a str) -> VisitInput<'a> {
        VisitInput {
            visitor_id: "a",
            ip,
            city: "Seoul",
            country: "South Korea",
            browser,
            os: "Windows",
            battery_level: "-",
        }
    }

    fn open_temp() -> (TempDir, Database) {
        let dir = TempDir::new().expect("temp dir");
        let database = Database::open(&dir.path().join("db").join("visitors.db")).expect("open");
        (dir, database)
    }

    #[test]
    fn upsert_creates_then_increments() {
        let (_dir, database) = open_temp();

        assert_eq!(database.upsert_visitor(&visit("1.2.3.4", "Chrome"), 1_000).expect("first"), 1);
        assert_eq!(database.upsert_visitor(&visit("1.2.3.4", "Firefox"), 2_000).expect("second"), 2);

        let row = database
            .visitor_by_ip("1.2.3.4")
            .expect("query")
            .expect("row exists");
        assert_eq!(row.browser, "Firefox");
        assert_eq!(row.first_visit, 1_000);
        assert_eq!(row.last_visit, 2_000);
        assert_eq!(row.visit_count, 2);
    }

    #[test]
    fn last_visit_never_moves_backwards() {
        let (_dir, database) = open_temp();

        database.upsert_visitor(&visit("5.5.5.5", "Chrome"), 5_000).expect("first");
        database.upsert_visitor(&visit("5.5.5.5", "Chrome"), 4_000).expect("second");

        let row = database.visitor_by_ip("5.5.5.5").expect("query").expect("row");
        assert_eq!(row.last_visit, 5_000);
        assert_eq!(row.visit_count, 2);
    }

    #[test]
    fn list_orders_by_last_visit_and_filters_active() {
        let (_dir, database) = open_temp();

        database.upsert_visitor(&visit("10.0.0.1", "Chrome"), 100).expect("insert");
        database.upsert_visitor(&visit("10.0.0.2", "Chrome"), 300).expect("insert");
        database.upsert_visitor(&visit("10.0.0.3", "Chrome"), 200).expect("insert");

        let all = database.list_visitors(10, None).expect("list");
        let ips = all.iter().map(|row| row.ip.as_str()).collect::<Vec<_>>();
        assert_eq!(ips, vec!["10.0.0.2", "10.0.0.3", "10.0.0.1"]);

        let limited = database.list_visitors(2, None).expect("list");
        assert_eq!(limited.len(), 2);

        let active = database.list_visitors(10, Some(200)).expect("list");
        assert_eq!(active.len(), 2);
    }

    #[test]
    fn stats_split_active_and_today() {
        let (_dir, database) = open_temp();

        database.upsert_visitor(&visit("10.0.0.1", "Chrome"), 100).expect("insert");
        database.upsert_visitor(&visit("10.0.0.2", "Chrome"), 500).expect("insert");
        database.upsert_visitor(&visit("10.0.0.3", "Chrome"), 900).expect("insert");

        let stats = database.visitor_stats(800, 400, 1_000).expect("stats");
        assert_eq!(stats.total, 3);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.today, 2);
    }

    #[test]
    fn latest_visit_is_none_when_empty() {
        let (_dir, database) = open_temp();

        assert_eq!(database.latest_visit_timestamp().expect("query"), None);
        database.upsert_visitor(&visit("10.0.0.1", "Chrome"), 42).expect("insert");
        assert_eq!(database.latest_visit_timestamp().expect("query"), Some(42));
    }
}
