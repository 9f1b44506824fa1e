mod connection;
mod source_repository;
mod fingerprint_store;
mod job_repository;

pub use connection::SqliteStorage;
pub use source_repository::SqliteSourceRepository;
pub use fingerprint_store::SqliteFingerprintStore;
pub use job_repository::SqliteJobRepository;
