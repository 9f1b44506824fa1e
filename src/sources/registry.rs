use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::{Source, SourceKind};
use crate::errors::{IngestError, IngestResult};
use crate::sources::http::{HttpFetcher, RetryPolicy};
use crate::sources::traits::SourceAdapter;
use crate::sources::{FeedAdapter, PaginatedApiAdapter, ScraperAdapter};

/// One adapter per source kind, chosen by the source's `kind` field.
#[derive(Default, Clone)]
pub struct AdapterRegistry {
    adapters: HashMap<SourceKind, Arc<dyn SourceAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in feed, api and scraper adapters sharing
    /// one HTTP client.
    pub fn with_defaults(timeout: Duration, retry: RetryPolicy) -> IngestResult<Self> {
        let http = HttpFetcher::new(timeout, retry)?;

        let mut registry = Self::new();
        registry.register(Arc::new(FeedAdapter::new(http.clone())));
        registry.register(Arc::new(PaginatedApiAdapter::new(http.clone())));
        registry.register(Arc::new(ScraperAdapter::new(http)));
        Ok(registry)
    }

    /// Replaces any adapter already registered for the same kind.
    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    pub fn adapter_for(&self, source: &Source) -> IngestResult<Arc<dyn SourceAdapter>> {
        self.adapters
            .get(&source.kind)
            .cloned()
            .ok_or_else(|| IngestError::UnsupportedSource(source.kind.to_string()))
    }

    /// Validate a source's configuration against its adapter.
    pub fn validate(&self, source: &Source) -> IngestResult<()> {
        self.adapter_for(source)?.validate(source)
    }
}
