use async_trait::async_trait;

use crate::domain::{Candidate, Source, SourceKind};
use crate::errors::{FetchError, IngestResult};

/// Fetches raw candidates from one kind of source.
///
/// Adapters only talk to the network. Health and rate state belong to the
/// orchestrator.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// The source kind this adapter serves.
    fn kind(&self) -> SourceKind;

    /// Check the source's endpoint configuration without fetching.
    fn validate(&self, source: &Source) -> IngestResult<()>;

    /// Fetch up to `limit` candidates. What `0` means is adapter specific.
    async fn fetch(&self, source: &Source, limit: usize) -> Result<Vec<Candidate>, FetchError>;
}
