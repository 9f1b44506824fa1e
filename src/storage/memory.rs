use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::domain::Fingerprint;
use crate::errors::{IngestError, IngestResult};
use crate::storage::traits::FingerprintStore;

/// Process-local fingerprint store for embedding and tests.
#[derive(Default)]
pub struct InMemoryFingerprintStore {
    entries: Mutex<HashMap<String, Fingerprint>>,
}

impl InMemoryFingerprintStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, Fingerprint>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl FingerprintStore for InMemoryFingerprintStore {
    fn seen(&self, digest: &str) -> IngestResult<bool> {
        Ok(self.entries().contains_key(digest))
    }

    fn record(&self, fingerprint: &Fingerprint) -> IngestResult<()> {
        let mut entries = self.entries();
        if entries.contains_key(&fingerprint.digest) {
            return Err(IngestError::DuplicateFingerprint(fingerprint.digest.clone()));
        }
        entries.insert(fingerprint.digest.clone(), fingerprint.clone());
        Ok(())
    }

    fn prune_before(&self, cutoff: DateTime<Utc>) -> IngestResult<usize> {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, fp| fp.first_seen >= cutoff);
        Ok(before - entries.len())
    }

    fn count(&self) -> IngestResult<usize> {
        Ok(self.entries().len())
    }
}
