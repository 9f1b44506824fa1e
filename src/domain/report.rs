use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AcquisitionJob, JobStatus, SourceStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthDelta {
    pub source_id: String,
    pub score_before: u8,
    pub score_after: u8,
    pub failures_before: u32,
    pub failures_after: u32,
    pub status_before: SourceStatus,
    pub status_after: SourceStatus,
}

impl HealthDelta {
    pub fn changed(&self) -> bool {
        self.score_before != self.score_after
            || self.failures_before != self.failures_after
            || self.status_before != self.status_after
    }
}

/// A configured source that was not selected, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludedSource {
    pub source_id: String,
    pub reason: String,
}

/// Everything that happened during one run. Built once, never modified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub dry_run: bool,
    pub cancelled: bool,
    pub jobs: Vec<AcquisitionJob>,
    pub excluded: Vec<ExcludedSource>,
    pub total_accepted: usize,
    pub health_deltas: Vec<HealthDelta>,
}

impl RunReport {
    pub fn job(&self, source_id: &str) -> Option<&AcquisitionJob> {
        self.jobs.iter().find(|j| j.source_id == source_id)
    }

    pub fn count_status(&self, status: JobStatus) -> usize {
        self.jobs.iter().filter(|j| j.status == status).count()
    }

    pub fn delta(&self, source_id: &str) -> Option<&HealthDelta> {
        self.health_deltas.iter().find(|d| d.source_id == source_id)
    }
}
