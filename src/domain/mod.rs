pub mod source;
pub mod candidate;
pub mod fingerprint;
pub mod job;
pub mod report;

pub use source::{Priority, RateBudget, Source, SourceKind, SourceStatus};
pub use candidate::Candidate;
pub use fingerprint::{Fingerprint, Normalizer, NormalizerConfig};
pub use job::{AcquisitionJob, ErrorDetail, JobCounts, JobStatus};
pub use report::{ExcludedSource, HealthDelta, RunReport};
