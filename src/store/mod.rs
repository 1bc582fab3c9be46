// Durable store for tasks, memories and sessions
//
// - Single SQLite file with WAL mode, opened by one daemon instance
// - Timestamps are written by SQLite itself (datetime('now')), so the
//   due-task query compares against the engine's clock, not ours
// - Each mutating method is a single statement under the connection lock

mod memories;
mod sessions;
mod tasks;

pub use memories::Memory;
pub use sessions::Session;
pub use tasks::{
    normalize_priority, NewTask, Task, TaskCounts, TaskStatus, DEFAULT_PRIORITY, MAX_PRIORITY,
    MIN_PRIORITY,
};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Row};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Format SQLite uses for `datetime('now')`
const SQL_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// SQLite-backed store shared by the heartbeat, the CLI and the chat loop
pub struct Store {
    db: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl Store {
    /// Open (or create) the database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        // Enable WAL mode for concurrency with CLI readers
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let conn = Self::init(conn)?;

        tracing::info!("Store opened: {}", path.display());

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open a private in-memory database (tests, dry runs)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let conn = Self::init(conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    fn init(conn: Connection) -> Result<Connection> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        let schema = include_str!("schema.sql");
        conn.execute_batch(schema)
            .context("Failed to apply store schema")?;
        Ok(conn)
    }

    /// Database file path (`None` for in-memory stores)
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

/// Render a timestamp in the same format SQLite's `datetime()` produces
pub(crate) fn to_sql_time(dt: &DateTime<Utc>) -> String {
    dt.format(SQL_TIME_FORMAT).to_string()
}

fn parse_sql_time(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, SQL_TIME_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Read a required timestamp column
pub(crate) fn time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_sql_time(idx, &raw)
}

/// Read a nullable timestamp column
pub(crate) fn opt_time_column(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| parse_sql_time(idx, &s)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_sql_time_matches_sqlite_format() {
        let dt = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(to_sql_time(&dt), "2024-03-09 07:05:01");
    }

    #[test]
    fn test_sql_time_parses_sqlite_output() {
        let conn = Connection::open_in_memory().unwrap();
        let now: String = conn
            .query_row("SELECT datetime('now')", [], |row| row.get(0))
            .unwrap();
        let parsed = parse_sql_time(0, &now).unwrap();
        let drift = (Utc::now() - parsed).num_seconds().abs();
        assert!(drift < 5, "SQLite clock should match ours, drift={}s", drift);
    }

    #[test]
    fn test_open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("fryler.db");
        let store = Store::open(&path).unwrap();
        assert!(path.exists());
        assert_eq!(store.path(), Some(path.as_path()));
    }

    #[test]
    fn test_open_twice_keeps_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fryler.db");
        drop(Store::open(&path).unwrap());
        // Second open must not fail on CREATE statements
        assert!(Store::open(&path).is_ok());
    }
}
