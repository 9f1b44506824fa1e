use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{AcquisitionJob, Fingerprint, Source, SourceStatus};
use crate::errors::IngestResult;

#[cfg_attr(test, mockall::automock)]
pub trait SourceRepository: Send + Sync {
    /// Insert a source or update its configuration fields. Health fields of
    /// an existing row are left alone.
    fn upsert(&self, source: &Source) -> IngestResult<()>;
    fn get_all(&self) -> IngestResult<Vec<Source>>;
    fn get(&self, id: &str) -> IngestResult<Option<Source>>;
    /// Persist status, health score, failure count and timestamps.
    fn save_health(&self, source: &Source) -> IngestResult<()>;
    fn set_status(&self, id: &str, status: SourceStatus) -> IngestResult<()>;
    /// Remote throttling hold, kept so the next process honours it too.
    fn set_hold(&self, id: &str, until: Option<DateTime<Utc>>) -> IngestResult<()>;
}

#[cfg_attr(test, mockall::automock)]
pub trait FingerprintStore: Send + Sync {
    /// Non-authoritative fast-path hint.
    fn seen(&self, digest: &str) -> IngestResult<bool>;
    /// Atomic check-and-insert. Fails with `DuplicateFingerprint` when the
    /// digest is already present.
    fn record(&self, fingerprint: &Fingerprint) -> IngestResult<()>;
    /// Remove fingerprints first seen before `cutoff`. Returns the count.
    fn prune_before(&self, cutoff: DateTime<Utc>) -> IngestResult<usize>;
    fn count(&self) -> IngestResult<usize>;
}

#[cfg_attr(test, mockall::automock)]
pub trait JobRepository: Send + Sync {
    fn save(&self, run_id: Uuid, job: &AcquisitionJob) -> IngestResult<()>;
    fn recent(&self, source_id: &str, limit: usize) -> IngestResult<Vec<AcquisitionJob>>;
    /// Start times of jobs that actually fetched after `cutoff`, oldest first.
    fn attempts_since(&self, source_id: &str, cutoff: DateTime<Utc>)
        -> IngestResult<Vec<DateTime<Utc>>>;
}
