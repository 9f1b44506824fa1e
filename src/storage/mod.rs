pub mod traits;
pub mod memory;
pub mod sqlite;

pub use traits::{FingerprintStore, JobRepository, SourceRepository};
pub use memory::InMemoryFingerprintStore;
pub use sqlite::{
    SqliteFingerprintStore, SqliteJobRepository, SqliteSourceRepository, SqliteStorage,
};
