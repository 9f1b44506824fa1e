use chrono::{DateTime, Utc};

use crate::domain::Fingerprint;
use crate::errors::{IngestError, IngestResult};
use crate::storage::sqlite::connection::stamp;
use crate::storage::sqlite::SqliteStorage;
use crate::storage::traits::FingerprintStore;

pub struct SqliteFingerprintStore {
    storage: SqliteStorage,
}

impl SqliteFingerprintStore {
    pub fn new(storage: SqliteStorage) -> Self {
        Self { storage }
    }
}

impl FingerprintStore for SqliteFingerprintStore {
    fn seen(&self, digest: &str) -> IngestResult<bool> {
        let conn = self.storage.connection()?;
        let mut stmt = conn.prepare("SELECT EXISTS(SELECT 1 FROM fingerprints WHERE digest = ?1)")?;
        let exists: bool = stmt.query_row([digest], |row| row.get(0))?;
        Ok(exists)
    }

    fn record(&self, fingerprint: &Fingerprint) -> IngestResult<()> {
        let conn = self.storage.connection()?;
        // The UNIQUE constraint decides; zero affected rows means someone got there first
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO fingerprints (digest, source_id, first_seen) VALUES (?1, ?2, ?3)",
            (
                &fingerprint.digest,
                &fingerprint.source_id,
                stamp(fingerprint.first_seen),
            ),
        )?;

        if inserted == 0 {
            return Err(IngestError::DuplicateFingerprint(fingerprint.digest.clone()));
        }
        Ok(())
    }

    fn prune_before(&self, cutoff: DateTime<Utc>) -> IngestResult<usize> {
        let conn = self.storage.connection()?;
        let removed = conn.execute(
            "DELETE FROM fingerprints WHERE first_seen < ?1",
            [stamp(cutoff)],
        )?;
        Ok(removed)
    }

    fn count(&self) -> IngestResult<usize> {
        let conn = self.storage.connection()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM fingerprints", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
