use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{AcquisitionJob, ErrorDetail, JobCounts, JobStatus};
use crate::errors::{IngestError, IngestResult};
use crate::storage::sqlite::connection::{format_time, parse_time, stamp};
use crate::storage::sqlite::SqliteStorage;
use crate::storage::traits::JobRepository;

pub struct SqliteJobRepository {
    storage: SqliteStorage,
}

impl SqliteJobRepository {
    pub fn new(storage: SqliteStorage) -> Self {
        Self { storage }
    }
}

impl JobRepository for SqliteJobRepository {
    fn save(&self, run_id: Uuid, job: &AcquisitionJob) -> IngestResult<()> {
        let conn = self.storage.connection()?;
        conn.execute(
            "INSERT INTO acquisition_jobs (run_id, source_id, status, requested_at, started_at, completed_at,
                fetched, duplicates, low_quality, accepted, sink_errors, error_kind, error_message, reason)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            rusqlite::params![
                run_id.to_string(),
                &job.source_id,
                job.status.as_str(),
                stamp(job.requested_at),
                format_time(job.started_at),
                format_time(job.completed_at),
                job.counts.fetched as i64,
                job.counts.duplicates as i64,
                job.counts.low_quality as i64,
                job.counts.accepted as i64,
                job.counts.sink_errors as i64,
                job.error.as_ref().map(|e| e.kind.as_str()),
                job.error.as_ref().map(|e| e.message.as_str()),
                job.reason.as_deref(),
            ],
        )?;
        Ok(())
    }

    fn recent(&self, source_id: &str, limit: usize) -> IngestResult<Vec<AcquisitionJob>> {
        let conn = self.storage.connection()?;
        let mut stmt = conn.prepare(
            "SELECT source_id, status, requested_at, started_at, completed_at, fetched, duplicates,
                low_quality, accepted, sink_errors, error_kind, error_message, reason
             FROM acquisition_jobs WHERE source_id = ?1
             ORDER BY requested_at DESC, id DESC LIMIT ?2",
        )?;

        let jobs = stmt.query_map(rusqlite::params![source_id, limit as i64], |row| {
            let status: String = row.get(1)?;
            let error_kind: Option<String> = row.get(10)?;
            let error_message: Option<String> = row.get(11)?;
            let count = |idx: usize| -> rusqlite::Result<usize> {
                Ok(row.get::<_, i64>(idx)?.max(0) as usize)
            };

            Ok(AcquisitionJob {
                source_id: row.get(0)?,
                status: status.parse().unwrap_or(JobStatus::Failed),
                requested_at: parse_time(row.get(2)?).unwrap_or_default(),
                started_at: parse_time(row.get(3)?),
                completed_at: parse_time(row.get(4)?),
                counts: JobCounts {
                    fetched: count(5)?,
                    duplicates: count(6)?,
                    low_quality: count(7)?,
                    accepted: count(8)?,
                    sink_errors: count(9)?,
                },
                error: error_kind
                    .and_then(|k| k.parse().ok())
                    .map(|kind| ErrorDetail {
                        kind,
                        message: error_message.unwrap_or_default(),
                    }),
                reason: row.get(12)?,
            })
        })?;

        jobs.collect::<Result<Vec<_>, _>>().map_err(IngestError::from)
    }

    fn attempts_since(
        &self,
        source_id: &str,
        cutoff: DateTime<Utc>,
    ) -> IngestResult<Vec<DateTime<Utc>>> {
        let conn = self.storage.connection()?;
        let mut stmt = conn.prepare(
            "SELECT started_at FROM acquisition_jobs
             WHERE source_id = ?1 AND started_at IS NOT NULL AND started_at > ?2
             ORDER BY started_at",
        )?;

        let rows = stmt.query_map(rusqlite::params![source_id, stamp(cutoff)], |row| {
            row.get::<_, Option<String>>(0)
        })?;

        let mut attempts = Vec::new();
        for raw in rows {
            if let Some(at) = parse_time(raw?) {
                attempts.push(at);
            }
        }
        Ok(attempts)
    }
}
