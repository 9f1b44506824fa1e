use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::domain::Candidate;
use crate::errors::{IngestError, IngestResult};

/// Downstream collaborator for accepted candidates.
///
/// Called once per accepted candidate, after its fingerprint is recorded.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContentSink: Send + Sync {
    async fn accept(&self, candidate: &Candidate) -> IngestResult<()>;
}

/// Appends each accepted candidate as one JSON line.
pub struct JsonLinesSink {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonLinesSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ContentSink for JsonLinesSink {
    async fn accept(&self, candidate: &Candidate) -> IngestResult<()> {
        let mut line = serde_json::to_string(candidate)?;
        line.push('\n');

        // Lines from concurrent workers must not interleave
        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| IngestError::Sink(format!("{}: {}", self.path.display(), e)))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| IngestError::Sink(format!("{}: {}", self.path.display(), e)))?;
        file.flush().await?;
        Ok(())
    }
}

/// Keeps accepted candidates in memory.
#[derive(Default)]
pub struct MemorySink {
    accepted: Mutex<Vec<Candidate>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accepted(&self) -> Vec<Candidate> {
        self.accepted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl ContentSink for MemorySink {
    async fn accept(&self, candidate: &Candidate) -> IngestResult<()> {
        self.accepted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(candidate.clone());
        Ok(())
    }
}
