pub mod rate_limiter;
pub mod health_monitor;
pub mod quality_filter;
pub mod sink;
pub mod orchestrator;

pub use rate_limiter::{Admission, RateLimiter};
pub use health_monitor::{HealthConfig, HealthMonitor, HealthState, SourceHealth};
pub use quality_filter::{QualityConfig, QualityFilter, Verdict};
pub use sink::{ContentSink, JsonLinesSink, MemorySink};
pub use orchestrator::{Orchestrator, OrchestratorConfig, RunFilter, SourceOverview};
