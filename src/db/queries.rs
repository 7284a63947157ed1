pub const CREATE_VISITORS: &str = r#"
CREATE TABLE IF NOT EXISTS visitors (
  id            INTEGER PRIMARY KEY AUTOINCREMENT,
  visitor_id    TEXT NOT NULL,
  ip            TEXT NOT NULL UNIQUE,
  city          TEXT NOT NULL DEFAULT '-',
  country       TEXT NOT NULL DEFAULT '-',
  browser       TEXT NOT NULL DEFAULT 'Unknown',
  os            TEXT NOT NULL DEFAULT 'Unknown',
  battery_level TEXT NOT NULL DEFAULT '-',
  first_visit   INTEGER NOT NULL,
  last_visit    INTEGER NOT NULL,
  visit_count   INTEGER NOT NULL DEFAULT 1
);
"#;

pub const INDEX_VISITORS_LAST_VISIT: &str =
    "CREATE INDEX IF NOT EXISTS idx_visitors_last_visit ON visitors(last_visit);";

/// Insert-or-increment in one statement; the counter never round-trips
/// through application code.
pub const UPSERT_VISITOR: &str = r#"
INSERT INTO visitors (visitor_id, ip, city, country, browser, os, battery_level, first_visit, last_visit, visit_count)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8, 1)
ON CONFLICT(ip) DO UPDATE SET
  browser       = excluded.browser,
  os            = excluded.os,
  battery_level = excluded.battery_level,
  last_visit    = MAX(visitors.last_visit, excluded.last_visit),
  visit_count   = visitors.visit_count + 1
RETURNING visit_count
"#;

pub const SELECT_VISITOR_COLUMNS: &str =
    "SELECT visitor_id, ip, city, country, browser, os, battery_level, first_visit, last_visit, visit_count FROM visitors";

pub const SELECT_VISITOR_STATS: &str = r#"
SELECT
  COUNT(*),
  COALESCE(SUM(CASE WHEN last_visit >= ?1 THEN 1 ELSE 0 END), 0),
  COALESCE(SUM(CASE WHEN last_visit >= ?2 AND last_visit < ?3 THEN 1 ELSE 0 END), 0)
FROM visitors
"#;

pub fn schema_statements() -> Vec<&'static str> {
    vec![CREATE_VISITORS, INDEX_VISITORS_LAST_VISIT]
}
