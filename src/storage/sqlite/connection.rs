use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::errors::{IngestError, IngestResult};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sources (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    kind TEXT NOT NULL,
    endpoint TEXT NOT NULL,
    language TEXT NOT NULL,
    priority TEXT NOT NULL,
    max_per_hour INTEGER NOT NULL,
    max_per_day INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    health_score INTEGER NOT NULL DEFAULT 100,
    consecutive_failures INTEGER NOT NULL DEFAULT 0,
    last_success_at TEXT,
    last_attempt_at TEXT,
    disabled_at TEXT,
    hold_until TEXT
);

CREATE TABLE IF NOT EXISTS fingerprints (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    digest TEXT NOT NULL UNIQUE,
    source_id TEXT NOT NULL,
    first_seen TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_fingerprints_first_seen ON fingerprints(first_seen);

CREATE TABLE IF NOT EXISTS acquisition_jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    source_id TEXT NOT NULL,
    status TEXT NOT NULL,
    requested_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    fetched INTEGER NOT NULL DEFAULT 0,
    duplicates INTEGER NOT NULL DEFAULT 0,
    low_quality INTEGER NOT NULL DEFAULT 0,
    accepted INTEGER NOT NULL DEFAULT 0,
    sink_errors INTEGER NOT NULL DEFAULT 0,
    error_kind TEXT,
    error_message TEXT,
    reason TEXT
);

CREATE INDEX IF NOT EXISTS idx_acquisition_jobs_source ON acquisition_jobs(source_id, requested_at);
CREATE INDEX IF NOT EXISTS idx_acquisition_jobs_started ON acquisition_jobs(source_id, started_at);
"#;

/// Columns added after the first schema shipped.
const ADDED_COLUMNS: &[(&str, &str, &str)] = &[("sources", "hold_until", "TEXT")];

fn migrate(conn: &Connection) -> IngestResult<()> {
    for (table, column, kind) in ADDED_COLUMNS {
        let present: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM pragma_table_info('{}') WHERE name = ?1", table),
            [column],
            |row| row.get(0),
        )?;
        if present == 0 {
            conn.execute_batch(&format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, kind))?;
        }
    }
    Ok(())
}

#[derive(Clone)]
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    pub fn new<P: AsRef<Path>>(path: P) -> IngestResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        migrate(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> IngestResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        migrate(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn connection(&self) -> Result<std::sync::MutexGuard<'_, Connection>, IngestError> {
        self.conn
            .lock()
            .map_err(|_| IngestError::Database(rusqlite::Error::InvalidQuery))
    }
}

/// Fixed-width UTC timestamps so that text comparison orders them correctly.
pub(crate) fn stamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn format_time(at: Option<DateTime<Utc>>) -> Option<String> {
    at.map(stamp)
}

pub(crate) fn parse_time(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_created() {
        let storage = SqliteStorage::in_memory().unwrap();
        let conn = storage.connection().unwrap();

        let mut stmt = conn
            .prepare("SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('sources', 'fingerprints', 'acquisition_jobs')")
            .unwrap();
        let count: i64 = stmt.query_row([], |row| row.get(0)).unwrap();
        assert_eq!(count, 3);
    }

    #[test]
    fn test_open_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ingest.db");
        SqliteStorage::new(&path).unwrap();
        // Reopening must not fail on the existing schema
        SqliteStorage::new(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_old_database_gains_hold_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE sources (
                    id TEXT PRIMARY KEY, name TEXT NOT NULL, kind TEXT NOT NULL,
                    endpoint TEXT NOT NULL, language TEXT NOT NULL, priority TEXT NOT NULL,
                    max_per_hour INTEGER NOT NULL, max_per_day INTEGER NOT NULL,
                    status TEXT NOT NULL DEFAULT 'active',
                    health_score INTEGER NOT NULL DEFAULT 100,
                    consecutive_failures INTEGER NOT NULL DEFAULT 0,
                    last_success_at TEXT, last_attempt_at TEXT, disabled_at TEXT
                );",
            )
            .unwrap();
        }

        let storage = SqliteStorage::new(&path).unwrap();
        let conn = storage.connection().unwrap();
        let present: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info('sources') WHERE name = 'hold_until'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(present, 1);
    }
}
