use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row};

use crate::domain::{Priority, RateBudget, Source, SourceKind, SourceStatus};
use crate::errors::{IngestError, IngestResult};
use crate::storage::sqlite::connection::{format_time, parse_time};
use crate::storage::sqlite::SqliteStorage;
use crate::storage::traits::SourceRepository;

const SELECT_SOURCE: &str = "SELECT id, name, kind, endpoint, language, priority, max_per_hour, max_per_day, \
     status, health_score, consecutive_failures, last_success_at, last_attempt_at, disabled_at, \
     hold_until \
     FROM sources";

pub struct SqliteSourceRepository {
    storage: SqliteStorage,
}

impl SqliteSourceRepository {
    pub fn new(storage: SqliteStorage) -> Self {
        Self { storage }
    }

    fn row_to_source(row: &Row<'_>) -> rusqlite::Result<Source> {
        let kind: String = row.get(2)?;
        let endpoint: String = row.get(3)?;
        let priority: String = row.get(5)?;
        let status: String = row.get(8)?;
        let health_score: i64 = row.get(9)?;

        Ok(Source {
            id: row.get(0)?,
            name: row.get(1)?,
            // Rows are only ever written from parsed enums
            kind: kind.parse().unwrap_or(SourceKind::Feed),
            endpoint: serde_json::from_str(&endpoint).unwrap_or(serde_json::Value::Null),
            language: row.get(4)?,
            priority: priority.parse().unwrap_or(Priority::Normal),
            budget: RateBudget::new(row.get(6)?, row.get(7)?),
            status: status.parse().unwrap_or(SourceStatus::Active),
            health_score: health_score.clamp(0, 100) as u8,
            consecutive_failures: row.get(10)?,
            last_success_at: parse_time(row.get(11)?),
            last_attempt_at: parse_time(row.get(12)?),
            disabled_at: parse_time(row.get(13)?),
            hold_until: parse_time(row.get(14)?),
        })
    }

    fn ensure_updated(changed: usize, id: &str) -> IngestResult<()> {
        if changed == 0 {
            return Err(IngestError::SourceNotFound(id.to_string()));
        }
        Ok(())
    }
}

impl SourceRepository for SqliteSourceRepository {
    fn upsert(&self, source: &Source) -> IngestResult<()> {
        let endpoint = serde_json::to_string(&source.endpoint)?;
        let conn = self.storage.connection()?;

        conn.execute(
            "INSERT INTO sources (id, name, kind, endpoint, language, priority, max_per_hour, max_per_day, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                kind = excluded.kind,
                endpoint = excluded.endpoint,
                language = excluded.language,
                priority = excluded.priority,
                max_per_hour = excluded.max_per_hour,
                max_per_day = excluded.max_per_day",
            (
                &source.id,
                &source.name,
                source.kind.as_str(),
                &endpoint,
                &source.language,
                source.priority.as_str(),
                source.budget.max_per_hour,
                source.budget.max_per_day,
                source.status.as_str(),
            ),
        )?;

        Ok(())
    }

    fn get_all(&self) -> IngestResult<Vec<Source>> {
        let conn = self.storage.connection()?;
        let mut stmt = conn.prepare(&format!("{} ORDER BY id", SELECT_SOURCE))?;
        let sources = stmt.query_map([], Self::row_to_source)?;

        sources
            .collect::<Result<Vec<_>, _>>()
            .map_err(IngestError::from)
    }

    fn get(&self, id: &str) -> IngestResult<Option<Source>> {
        let conn = self.storage.connection()?;
        let mut stmt = conn.prepare(&format!("{} WHERE id = ?1", SELECT_SOURCE))?;
        let source = stmt.query_row([id], Self::row_to_source).optional()?;
        Ok(source)
    }

    fn save_health(&self, source: &Source) -> IngestResult<()> {
        let conn = self.storage.connection()?;
        let changed = conn.execute(
            "UPDATE sources SET status = ?2, health_score = ?3, consecutive_failures = ?4,
                last_success_at = ?5, last_attempt_at = ?6, disabled_at = ?7
             WHERE id = ?1",
            (
                &source.id,
                source.status.as_str(),
                source.health_score,
                source.consecutive_failures,
                format_time(source.last_success_at),
                format_time(source.last_attempt_at),
                format_time(source.disabled_at),
            ),
        )?;
        Self::ensure_updated(changed, &source.id)
    }

    fn set_status(&self, id: &str, status: SourceStatus) -> IngestResult<()> {
        let conn = self.storage.connection()?;
        let changed = conn.execute(
            "UPDATE sources SET status = ?2, disabled_at = NULL WHERE id = ?1",
            (id, status.as_str()),
        )?;
        Self::ensure_updated(changed, id)
    }

    fn set_hold(&self, id: &str, until: Option<DateTime<Utc>>) -> IngestResult<()> {
        let conn = self.storage.connection()?;
        let changed = conn.execute(
            "UPDATE sources SET hold_until = ?2 WHERE id = ?1",
            (id, format_time(until)),
        )?;
        Self::ensure_updated(changed, id)
    }
}
