use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{FetchError, FetchErrorKind, IngestError, IngestResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Skipped
        )
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            "skipped" => Ok(JobStatus::Skipped),
            _ => Err(format!("Unknown job status: {}", s)),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub fetched: usize,
    pub duplicates: usize,
    pub low_quality: usize,
    pub accepted: usize,
    pub sink_errors: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub kind: FetchErrorKind,
    pub message: String,
}

impl From<&FetchError> for ErrorDetail {
    fn from(err: &FetchError) -> Self {
        Self {
            kind: err.kind,
            message: err.message.clone(),
        }
    }
}

/// One attempt to fetch from one source during one run.
///
/// Moves `pending -> running -> succeeded | failed`, or `pending -> skipped`
/// (and `pending -> failed` when cancelled before it started). Once terminal
/// it can no longer change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionJob {
    pub source_id: String,
    pub requested_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub counts: JobCounts,
    pub error: Option<ErrorDetail>,
    /// Why the job was skipped.
    pub reason: Option<String>,
}

impl AcquisitionJob {
    pub fn new(source_id: impl Into<String>, requested_at: DateTime<Utc>) -> Self {
        Self {
            source_id: source_id.into(),
            requested_at,
            started_at: None,
            completed_at: None,
            status: JobStatus::Pending,
            counts: JobCounts::default(),
            error: None,
            reason: None,
        }
    }

    fn guard(&self, to: JobStatus) -> IngestResult<()> {
        let allowed = match (self.status, to) {
            (JobStatus::Pending, JobStatus::Running) => true,
            (JobStatus::Pending, JobStatus::Skipped) => true,
            (JobStatus::Pending, JobStatus::Failed) => true,
            (JobStatus::Running, JobStatus::Succeeded) => true,
            (JobStatus::Running, JobStatus::Failed) => true,
            _ => false,
        };

        if allowed {
            Ok(())
        } else {
            Err(IngestError::InvalidTransition(format!(
                "job for {} cannot move from {} to {}",
                self.source_id, self.status, to
            )))
        }
    }

    pub fn start(&mut self, at: DateTime<Utc>) -> IngestResult<()> {
        self.guard(JobStatus::Running)?;
        self.status = JobStatus::Running;
        self.started_at = Some(at);
        Ok(())
    }

    pub fn succeed(&mut self, at: DateTime<Utc>) -> IngestResult<()> {
        self.guard(JobStatus::Succeeded)?;
        self.status = JobStatus::Succeeded;
        self.completed_at = Some(at);
        Ok(())
    }

    pub fn fail(&mut self, error: &FetchError, at: DateTime<Utc>) -> IngestResult<()> {
        self.guard(JobStatus::Failed)?;
        self.status = JobStatus::Failed;
        self.error = Some(ErrorDetail::from(error));
        self.completed_at = Some(at);
        Ok(())
    }

    pub fn skip(&mut self, reason: impl Into<String>, at: DateTime<Utc>) -> IngestResult<()> {
        self.guard(JobStatus::Skipped)?;
        self.status = JobStatus::Skipped;
        self.reason = Some(reason.into());
        self.completed_at = Some(at);
        Ok(())
    }

    pub fn error_kind(&self) -> Option<FetchErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}
