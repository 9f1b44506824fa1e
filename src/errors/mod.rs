use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Source errors
    #[error("Source not found: {0}")]
    SourceNotFound(String),

    #[error("No adapter registered for source kind: {0}")]
    UnsupportedSource(String),

    // Network errors
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    // Dedup signal from the fingerprint store
    #[error("Fingerprint already recorded: {0}")]
    DuplicateFingerprint(String),

    // Job lifecycle
    #[error("Invalid job transition: {0}")]
    InvalidTransition(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    // Downstream sink errors
    #[error("Sink rejected candidate: {0}")]
    Sink(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // User input errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type IngestResult<T> = Result<T, IngestError>;

/// Why an adapter fetch failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    /// Timeouts, connection resets, 5xx. Retryable at a future run.
    TransientNetwork,
    /// The remote document could not be parsed.
    StructuralParse,
    /// The remote API throttled us.
    RemoteRateLimited,
    /// Operator or deadline driven.
    Cancelled,
}

impl FetchErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchErrorKind::TransientNetwork => "transient_network",
            FetchErrorKind::StructuralParse => "structural_parse",
            FetchErrorKind::RemoteRateLimited => "remote_rate_limited",
            FetchErrorKind::Cancelled => "cancelled",
        }
    }

    /// Remote throttling and cancellation are not the source's fault.
    pub fn counts_toward_health(&self) -> bool {
        matches!(
            self,
            FetchErrorKind::TransientNetwork | FetchErrorKind::StructuralParse
        )
    }

    /// Only transient network failures are retried inside a single fetch.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchErrorKind::TransientNetwork)
    }
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FetchErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transient_network" => Ok(FetchErrorKind::TransientNetwork),
            "structural_parse" => Ok(FetchErrorKind::StructuralParse),
            "remote_rate_limited" => Ok(FetchErrorKind::RemoteRateLimited),
            "cancelled" => Ok(FetchErrorKind::Cancelled),
            _ => Err(format!("Unknown fetch error kind: {}", s)),
        }
    }
}

/// Error returned by a source adapter. Always attached to the job, never
/// allowed to abort the run.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}: {message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub message: String,
    pub retry_after: Option<Duration>,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::TransientNetwork, message)
    }

    pub fn structural(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::StructuralParse, message)
    }

    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            retry_after,
            ..Self::new(FetchErrorKind::RemoteRateLimited, message)
        }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Cancelled, message)
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            FetchError::structural(err.to_string())
        } else {
            FetchError::transient(err.to_string())
        }
    }
}
