//! Coordinates one acquisition run across many sources.
//!
//! Sources are selected and ordered up front, then dispatched onto a bounded
//! worker pool. Each worker owns one source's job from `running` to a
//! terminal state; the dispatching task is the only one that persists jobs
//! and health.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::clock::Clock;
use crate::domain::source::primary_language;
use crate::domain::{
    AcquisitionJob, Candidate, ExcludedSource, Fingerprint, HealthDelta, JobCounts, Normalizer,
    NormalizerConfig, RunReport, Source, SourceStatus,
};
use crate::errors::{FetchError, FetchErrorKind, IngestError, IngestResult};
use crate::services::health_monitor::{HealthConfig, HealthMonitor, HealthState, SourceHealth};
use crate::services::quality_filter::{QualityConfig, QualityFilter};
use crate::services::rate_limiter::{Admission, RateLimiter};
use crate::services::sink::ContentSink;
use crate::sources::AdapterRegistry;
use crate::storage::{FingerprintStore, JobRepository, SourceRepository};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Worker pool size, independent of how many sources are selected.
    pub workers: usize,
    /// How long in-flight fetches may keep running after cancellation.
    pub grace_period: Duration,
    /// Hold applied when a remote API throttles us without a `Retry-After`.
    pub remote_backoff: Duration,
    pub health: HealthConfig,
    pub quality: QualityConfig,
    pub normalizer: NormalizerConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            grace_period: Duration::from_secs(10),
            remote_backoff: Duration::from_secs(300),
            health: HealthConfig::default(),
            quality: QualityConfig::default(),
            normalizer: NormalizerConfig::default(),
        }
    }
}

/// Which sources a run covers.
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    /// Empty means every configured source.
    pub source_ids: Vec<String>,
    /// Empty means every language.
    pub languages: Vec<String>,
    pub max_articles_per_source: usize,
    /// Select explicitly named sources even when they are not eligible.
    pub force: bool,
}

impl RunFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn sources<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.source_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn languages<I, S>(mut self, languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.languages = languages.into_iter().map(Into::into).collect();
        self
    }

    pub fn max_articles(mut self, max: usize) -> Self {
        self.max_articles_per_source = max;
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

/// A source as shown to operators.
#[derive(Debug, Clone)]
pub struct SourceOverview {
    pub source: Source,
    pub eligible: bool,
    pub state: HealthState,
}

struct JobOutcome {
    job: AcquisitionJob,
    health: Option<SourceHealth>,
    hold_until: Option<DateTime<Utc>>,
}

impl JobOutcome {
    fn bare(job: AcquisitionJob) -> Self {
        Self {
            job,
            health: None,
            hold_until: None,
        }
    }
}

struct Dispatch {
    source: Source,
    job: AcquisitionJob,
    before: Option<SourceHealth>,
}

#[derive(Clone)]
pub struct Orchestrator {
    sources: Arc<dyn SourceRepository>,
    fingerprints: Arc<dyn FingerprintStore>,
    jobs: Arc<dyn JobRepository>,
    adapters: Arc<AdapterRegistry>,
    sink: Arc<dyn ContentSink>,
    clock: Arc<dyn Clock>,
    rate_limiter: Arc<RateLimiter>,
    health: Arc<HealthMonitor>,
    quality: Arc<QualityFilter>,
    normalizer: Arc<Normalizer>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        sources: Arc<dyn SourceRepository>,
        fingerprints: Arc<dyn FingerprintStore>,
        jobs: Arc<dyn JobRepository>,
        adapters: AdapterRegistry,
        sink: Arc<dyn ContentSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sources,
            fingerprints,
            jobs,
            adapters: Arc::new(adapters),
            sink,
            rate_limiter: Arc::new(RateLimiter::new(Arc::clone(&clock))),
            health: Arc::new(HealthMonitor::new(config.health.clone(), Arc::clone(&clock))),
            quality: Arc::new(QualityFilter::new(config.quality.clone())),
            normalizer: Arc::new(Normalizer::new(config.normalizer.clone())),
            clock,
            config,
        }
    }

    pub fn health(&self) -> &HealthMonitor {
        &self.health
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// Upsert configured sources. Health fields of known sources survive, and
    /// a breaker-disabled source is not re-enabled by a catalog saying `active`.
    pub fn sync_catalog(&self, catalog: &[Source]) -> IngestResult<usize> {
        for source in catalog {
            self.adapters.validate(source)?;
        }
        for source in catalog {
            if let Some(existing) = self.sources.get(&source.id)? {
                let breaker_owned = existing.status == SourceStatus::Error
                    && source.status == SourceStatus::Active;
                if existing.status != source.status && !breaker_owned {
                    self.sources.set_status(&source.id, source.status)?;
                }
            }
            self.sources.upsert(source)?;
        }
        info!(count = catalog.len(), "source catalog synced");
        Ok(catalog.len())
    }

    /// Load persisted health and budgets into the in-memory monitors. Rate
    /// windows are seeded from job history the first time a source is seen.
    fn refresh(&self) -> IngestResult<Vec<Source>> {
        let sources = self.sources.get_all()?;
        let cutoff = self.clock.now() - chrono::Duration::days(1);
        for source in &sources {
            self.health.observe(source);
            self.rate_limiter.configure(&source.id, source.budget);
            if !self.rate_limiter.is_restored(&source.id) {
                let attempts = self.jobs.attempts_since(&source.id, cutoff)?;
                self.rate_limiter.restore(&source.id, attempts, source.hold_until);
            }
        }
        Ok(sources)
    }

    pub fn overview(&self) -> IngestResult<Vec<SourceOverview>> {
        let sources = self.refresh()?;
        Ok(sources
            .into_iter()
            .map(|source| SourceOverview {
                eligible: self.health.is_eligible(&source.id),
                state: self.health.state(&source.id).unwrap_or(HealthState::Healthy),
                source,
            })
            .collect())
    }

    /// Manual override for a disabled source.
    pub fn reactivate(&self, source_id: &str) -> IngestResult<SourceHealth> {
        let mut source = self
            .sources
            .get(source_id)?
            .ok_or_else(|| IngestError::SourceNotFound(source_id.to_string()))?;

        self.health.observe(&source);
        let health = self.health.reactivate(source_id)?;
        health.apply_to(&mut source);
        self.sources.save_health(&source)?;
        Ok(health)
    }

    fn exclusion_reason(&self, source: &Source, filter: &RunFilter) -> Option<String> {
        let named = filter.source_ids.iter().any(|id| *id == source.id);
        if !filter.source_ids.is_empty() && !named {
            return Some("not requested".to_string());
        }

        if !filter.languages.is_empty() {
            let language = source.language_code();
            if !filter
                .languages
                .iter()
                .any(|l| primary_language(l) == language)
            {
                return Some(format!("filtered by language ({})", source.language));
            }
        }

        if self.health.is_eligible(&source.id) || (filter.force && named) {
            return None;
        }

        Some(match source.status {
            SourceStatus::Error => "circuit open".to_string(),
            status => status.to_string(),
        })
    }

    #[instrument(skip_all, fields(dry_run = dry_run))]
    pub async fn run_acquisition(
        &self,
        filter: RunFilter,
        dry_run: bool,
        cancel: CancelToken,
        deadline: Option<Duration>,
    ) -> IngestResult<RunReport> {
        if filter.force && filter.source_ids.is_empty() {
            return Err(IngestError::InvalidInput(
                "force only applies to explicitly named sources".to_string(),
            ));
        }

        let run_id = Uuid::new_v4();
        let started_at = self.clock.now();
        let timer = Instant::now();

        let all = self.refresh()?;

        for id in &filter.source_ids {
            if !all.iter().any(|s| s.id == *id) {
                return Err(IngestError::SourceNotFound(id.clone()));
            }
        }

        let mut selected = Vec::new();
        let mut excluded = Vec::new();
        for source in all {
            match self.exclusion_reason(&source, &filter) {
                Some(reason) => {
                    debug!(source = %source.id, %reason, "source excluded");
                    excluded.push(ExcludedSource {
                        source_id: source.id.clone(),
                        reason,
                    });
                }
                None => selected.push(source),
            }
        }

        // Configuration errors abort the run before anything is fetched
        for source in &selected {
            self.adapters.validate(source)?;
        }

        selected.sort_by_key(|s| s.priority);
        info!(%run_id, selected = selected.len(), excluded = excluded.len(), "starting acquisition run");

        let mut finished: Vec<(usize, JobOutcome)> = Vec::new();
        let mut admitted: Vec<(usize, Dispatch)> = Vec::new();

        for (index, source) in selected.into_iter().enumerate() {
            let mut job = AcquisitionJob::new(&source.id, self.clock.now());
            match self.rate_limiter.try_acquire(&source.id) {
                Admission::Allowed => admitted.push((
                    index,
                    Dispatch {
                        before: self.health.snapshot(&source.id),
                        source,
                        job,
                    },
                )),
                Admission::Denied { retry_after } => {
                    job.skip(skip_reason(retry_after), self.clock.now())?;
                    info!(source = %source.id, reason = ?job.reason, "source skipped");
                    finished.push((index, JobOutcome::bare(job)));
                }
            }
        }

        let deadline_timer = deadline.map(|d| {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(d).await;
                warn!(deadline = ?d, "run deadline reached, cancelling");
                cancel.cancel();
            })
        });

        let run_seen: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));
        let semaphore = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let mut befores = Vec::new();
        let mut tasks = JoinSet::new();

        for (index, dispatch) in admitted {
            let Dispatch {
                source,
                mut job,
                before,
            } = dispatch;
            befores.push((index, source.clone(), before));

            // Priority order is kept by handing out permits in sequence
            let permit = tokio::select! {
                permit = Arc::clone(&semaphore).acquire_owned() => permit.ok(),
                _ = cancel.cancelled() => None,
            };
            let Some(permit) = permit else {
                job.fail(
                    &FetchError::cancelled("run cancelled before fetch started"),
                    self.clock.now(),
                )?;
                finished.push((index, JobOutcome::bare(job)));
                continue;
            };

            let worker = self.clone();
            let cancel = cancel.clone();
            let run_seen = Arc::clone(&run_seen);
            let limit = filter.max_articles_per_source;
            let source_id = source.id.clone();
            let requested_at = job.requested_at;
            tasks.spawn(async move {
                let run = AssertUnwindSafe(
                    worker
                        .clone()
                        .execute(source, job, limit, dry_run, cancel, run_seen),
                )
                .catch_unwind()
                .await;
                let outcome = match run {
                    Ok(outcome) => outcome,
                    Err(_) => worker.worker_panicked(&source_id, requested_at),
                };
                drop(permit);
                (index, outcome)
            });
        }

        let mut fatal: Option<IngestError> = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(outcome))) => finished.push((index, outcome)),
                Ok((_, Err(e))) => {
                    error!(error = %e, "job aborted");
                    fatal.get_or_insert(e);
                }
                Err(e) => error!(error = %e, "worker task failed"),
            }
        }

        if let Some(timer) = deadline_timer {
            timer.abort();
        }
        if let Some(e) = fatal {
            return Err(e);
        }

        finished.sort_by_key(|(index, _)| *index);

        for (_, outcome) in &finished {
            if let Some(until) = outcome.hold_until {
                self.sources.set_hold(&outcome.job.source_id, Some(until))?;
            }
        }

        let mut health_deltas = Vec::new();
        for (index, source, before) in befores {
            let after = finished
                .iter()
                .find(|(i, _)| *i == index)
                .and_then(|(_, o)| o.health.clone());

            if let (Some(before), Some(after)) = (before, after) {
                let mut updated = source.clone();
                after.apply_to(&mut updated);
                self.sources.save_health(&updated)?;

                let delta = HealthDelta {
                    source_id: source.id.clone(),
                    score_before: before.score,
                    score_after: after.score,
                    failures_before: before.consecutive_failures,
                    failures_after: after.consecutive_failures,
                    status_before: before.status,
                    status_after: after.status,
                };
                // Neutral outcomes only move `last_attempt_at`
                if delta.changed() {
                    health_deltas.push(delta);
                }
            }
        }

        let jobs: Vec<AcquisitionJob> = finished.into_iter().map(|(_, o)| o.job).collect();
        for job in &jobs {
            self.jobs.save(run_id, job)?;
        }

        let total_accepted = jobs.iter().map(|j| j.counts.accepted).sum();
        let report = RunReport {
            run_id,
            started_at,
            finished_at: self.clock.now(),
            duration_ms: timer.elapsed().as_millis() as u64,
            dry_run,
            cancelled: cancel.is_cancelled(),
            jobs,
            excluded,
            total_accepted,
            health_deltas,
        };

        info!(
            %run_id,
            accepted = report.total_accepted,
            jobs = report.jobs.len(),
            duration_ms = report.duration_ms,
            "acquisition run finished"
        );
        Ok(report)
    }

    /// One source, from admission to terminal job state.
    async fn execute(
        self,
        source: Source,
        mut job: AcquisitionJob,
        limit: usize,
        dry_run: bool,
        cancel: CancelToken,
        run_seen: Arc<Mutex<HashSet<String>>>,
    ) -> IngestResult<JobOutcome> {
        if cancel.is_cancelled() {
            job.fail(
                &FetchError::cancelled("run cancelled before fetch started"),
                self.clock.now(),
            )?;
            return Ok(JobOutcome::bare(job));
        }

        // Atomic check-and-record; concurrent runs cannot overshoot the budget
        if let Admission::Denied { retry_after } = self.rate_limiter.record_attempt(&source.id) {
            job.skip(skip_reason(retry_after), self.clock.now())?;
            return Ok(JobOutcome::bare(job));
        }

        job.start(self.clock.now())?;
        let adapter = self.adapters.adapter_for(&source)?;

        let fetch = AssertUnwindSafe(adapter.fetch(&source, limit))
            .catch_unwind()
            .map(|r| r.unwrap_or_else(|_| Err(FetchError::structural("adapter panicked"))));
        tokio::pin!(fetch);

        let result = tokio::select! {
            result = &mut fetch => result,
            _ = cancel.cancelled() => {
                match tokio::time::timeout(self.config.grace_period, &mut fetch).await {
                    Ok(result) => result,
                    Err(_) => Err(FetchError::cancelled("fetch abandoned after grace period")),
                }
            }
        };

        let mut hold_until = None;
        let health = match result {
            Ok(candidates) => {
                self.process(&source, candidates, dry_run, &run_seen, &mut job.counts)
                    .await?;
                job.succeed(self.clock.now())?;
                info!(
                    source = %source.id,
                    fetched = job.counts.fetched,
                    duplicates = job.counts.duplicates,
                    low_quality = job.counts.low_quality,
                    accepted = job.counts.accepted,
                    "fetch succeeded"
                );
                Some(self.health.record_outcome(&source.id, true)?)
            }
            Err(err) => {
                warn!(source = %source.id, kind = %err.kind, error = %err.message, "fetch failed");
                job.fail(&err, self.clock.now())?;

                match err.kind {
                    FetchErrorKind::RemoteRateLimited => {
                        let hold = err.retry_after.unwrap_or(self.config.remote_backoff);
                        hold_until = Some(self.rate_limiter.hold(&source.id, hold));
                        Some(self.health.touch(&source.id)?)
                    }
                    kind if self.health.counts_failure(kind) => {
                        Some(self.health.record_outcome(&source.id, false)?)
                    }
                    _ => Some(self.health.touch(&source.id)?),
                }
            }
        };

        Ok(JobOutcome {
            job,
            health,
            hold_until,
        })
    }

    /// A worker that unwound mid-job still leaves a failed job behind.
    fn worker_panicked(
        &self,
        source_id: &str,
        requested_at: DateTime<Utc>,
    ) -> IngestResult<JobOutcome> {
        error!(source = source_id, "worker panicked");
        let now = self.clock.now();
        let error = FetchError::structural("worker panicked");

        let mut job = AcquisitionJob::new(source_id, requested_at);
        job.start(now)?;
        job.fail(&error, now)?;

        let health = if self.health.counts_failure(error.kind) {
            self.health.record_outcome(source_id, false)?
        } else {
            self.health.touch(source_id)?
        };
        Ok(JobOutcome {
            job,
            health: Some(health),
            hold_until: None,
        })
    }

    /// Dedup, filter and hand off, in the order the adapter returned them.
    async fn process(
        &self,
        source: &Source,
        candidates: Vec<Candidate>,
        dry_run: bool,
        run_seen: &Mutex<HashSet<String>>,
        counts: &mut JobCounts,
    ) -> IngestResult<()> {
        counts.fetched = candidates.len();

        for mut candidate in candidates {
            let digest = self.normalizer.digest(&candidate);

            let seen_in_run = run_seen
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .contains(&digest);
            if seen_in_run || self.fingerprints.seen(&digest)? {
                counts.duplicates += 1;
                debug!(source = %source.id, url = %candidate.url, "duplicate");
                continue;
            }

            let verdict = self.quality.evaluate(&candidate, source);
            candidate.quality_score = Some(verdict.score);
            if !verdict.accept {
                counts.low_quality += 1;
                debug!(source = %source.id, url = %candidate.url, reason = %verdict.reason, "low quality");
                continue;
            }

            if dry_run {
                // Dry runs never touch the store; the run-local set keeps counts honest
                let fresh = run_seen
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(digest);
                if fresh {
                    counts.accepted += 1;
                } else {
                    counts.duplicates += 1;
                }
                continue;
            }

            let fingerprint = Fingerprint::new(digest, &source.id, self.clock.now());
            match self.fingerprints.record(&fingerprint) {
                Ok(()) => {}
                Err(IngestError::DuplicateFingerprint(_)) => {
                    counts.duplicates += 1;
                    debug!(source = %source.id, url = %candidate.url, "duplicate (lost race)");
                    continue;
                }
                Err(e) => return Err(e),
            }
            counts.accepted += 1;

            if let Err(e) = self.sink.accept(&candidate).await {
                counts.sink_errors += 1;
                warn!(source = %source.id, url = %candidate.url, error = %e, "sink rejected candidate");
            }
        }

        Ok(())
    }
}

fn skip_reason(retry_after: Option<Duration>) -> String {
    match retry_after {
        Some(wait) => format!("rate budget exhausted; retry in {}s", wait.as_secs().max(1)),
        None => "no rate budget".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::domain::{JobStatus, Priority, RateBudget, SourceKind};
    use crate::services::sink::MockContentSink;
    use crate::sources::SourceAdapter;
    use crate::storage::traits::{MockFingerprintStore, MockJobRepository, MockSourceRepository};
    use crate::storage::{
        InMemoryFingerprintStore, SqliteJobRepository, SqliteSourceRepository, SqliteStorage,
    };
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap;

    const BODY: &str = "The council met on Tuesday and voted in favour of the plan that is \
        expected to reshape the city centre for the next decade with new parks and housing. ";

    fn good(source_id: &str, slug: &str) -> Candidate {
        Candidate::new(source_id, format!("Story {}", slug), format!("https://news.example.com/{}", slug))
            .with_body(BODY.repeat(10))
            .with_published(Some(Utc::now()))
    }

    fn thin(source_id: &str, slug: &str) -> Candidate {
        Candidate::new(source_id, format!("Thin {}", slug), format!("https://news.example.com/{}", slug))
            .with_body("Only a few words here.")
    }

    /// Returns canned results per source id.
    struct StubAdapter {
        kind: SourceKind,
        results: Mutex<HashMap<String, Result<Vec<Candidate>, FetchError>>>,
        delay: Option<Duration>,
    }

    impl StubAdapter {
        fn new(kind: SourceKind) -> Self {
            Self {
                kind,
                results: Mutex::new(HashMap::new()),
                delay: None,
            }
        }

        fn returning(self, id: &str, result: Result<Vec<Candidate>, FetchError>) -> Self {
            self.results.lock().unwrap().insert(id.to_string(), result);
            self
        }

        fn slow(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }
    }

    #[async_trait]
    impl SourceAdapter for StubAdapter {
        fn kind(&self) -> SourceKind {
            self.kind
        }

        fn validate(&self, _source: &Source) -> IngestResult<()> {
            Ok(())
        }

        async fn fetch(&self, source: &Source, _limit: usize) -> Result<Vec<Candidate>, FetchError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.results
                .lock()
                .unwrap()
                .get(&source.id)
                .cloned()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    struct PanickingSink;

    #[async_trait]
    impl ContentSink for PanickingSink {
        async fn accept(&self, _candidate: &Candidate) -> IngestResult<()> {
            panic!("sink bug");
        }
    }

    fn build(
        sources: Arc<dyn SourceRepository>,
        fingerprints: Arc<dyn FingerprintStore>,
        jobs: Arc<dyn JobRepository>,
        sink: Arc<dyn ContentSink>,
        adapter: StubAdapter,
        clock: Arc<ManualClock>,
    ) -> Orchestrator {
        let mut registry = AdapterRegistry::new();
        registry.register(Arc::new(adapter));
        Orchestrator::new(
            OrchestratorConfig::default(),
            sources,
            fingerprints,
            jobs,
            registry,
            sink,
            clock,
        )
    }

    struct Fixture {
        orchestrator: Orchestrator,
        sources: Arc<SqliteSourceRepository>,
        fingerprints: Arc<InMemoryFingerprintStore>,
    }

    fn fixture(adapters: Vec<StubAdapter>, sink: MockContentSink, catalog: Vec<Source>) -> Fixture {
        let storage = SqliteStorage::in_memory().unwrap();
        let sources = Arc::new(SqliteSourceRepository::new(storage.clone()));
        let fingerprints = Arc::new(InMemoryFingerprintStore::new());
        let jobs = Arc::new(SqliteJobRepository::new(storage));

        let mut registry = AdapterRegistry::new();
        for adapter in adapters {
            registry.register(Arc::new(adapter));
        }

        let orchestrator = Orchestrator::new(
            OrchestratorConfig {
                grace_period: Duration::from_millis(50),
                ..OrchestratorConfig::default()
            },
            sources.clone(),
            fingerprints.clone(),
            jobs,
            registry,
            Arc::new(sink),
            Arc::new(ManualClock::default()),
        );
        orchestrator.sync_catalog(&catalog).unwrap();

        Fixture {
            orchestrator,
            sources,
            fingerprints,
        }
    }

    #[tokio::test]
    async fn test_feed_scenario_counts_and_single_handoff() {
        let feed = StubAdapter::new(SourceKind::Feed).returning(
            "a",
            Ok(vec![good("a", "old"), thin("a", "thin"), good("a", "fresh")]),
        );
        let mut sink = MockContentSink::new();
        sink.expect_accept()
            .withf(|c| c.title == "Story fresh")
            .times(1)
            .returning(|_| Ok(()));

        let source = Source::new("a", "A", SourceKind::Feed)
            .with_priority(Priority::High)
            .with_budget(RateBudget::new(10, 100));
        let fx = fixture(vec![feed], sink, vec![source]);

        let digest = Normalizer::default().digest(&good("other", "old"));
        fx.fingerprints
            .record(&Fingerprint::new(digest, "other", Utc::now()))
            .unwrap();

        let report = fx
            .orchestrator
            .run_acquisition(RunFilter::all(), false, CancelToken::new(), None)
            .await
            .unwrap();

        let job = report.job("a").unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.counts.fetched, 3);
        assert_eq!(job.counts.duplicates, 1);
        assert_eq!(job.counts.low_quality, 1);
        assert_eq!(job.counts.accepted, 1);
        assert_eq!(report.total_accepted, 1);
    }

    #[tokio::test]
    async fn test_remote_rate_limit_is_neutral_for_health() {
        let api = StubAdapter::new(SourceKind::Api).returning(
            "b",
            Err(FetchError::rate_limited(
                "HTTP 429 Too Many Requests",
                Some(Duration::from_secs(90)),
            )),
        );
        let fx = fixture(
            vec![api],
            MockContentSink::new(),
            vec![Source::new("b", "B", SourceKind::Api)],
        );

        let report = fx
            .orchestrator
            .run_acquisition(RunFilter::all(), false, CancelToken::new(), None)
            .await
            .unwrap();

        let job = report.job("b").unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_kind(), Some(FetchErrorKind::RemoteRateLimited));
        assert_eq!(
            fx.orchestrator.health().snapshot("b").unwrap().consecutive_failures,
            0
        );
        // The remote hold keeps the next run from hammering the API
        assert_eq!(
            fx.orchestrator.rate_limiter().try_acquire("b"),
            Admission::Denied {
                retry_after: Some(Duration::from_secs(90))
            }
        );

        let stored = fx.sources.get("b").unwrap().unwrap();
        assert!(stored.hold_until.is_some());
        assert!(stored.last_attempt_at.is_some());
        assert_eq!(stored.consecutive_failures, 0);
        assert_eq!(stored.health_score, 100);
    }

    #[tokio::test]
    async fn test_panicking_sink_still_reports_failed_job() {
        let storage = SqliteStorage::in_memory().unwrap();
        let sources = Arc::new(SqliteSourceRepository::new(storage.clone()));
        let orchestrator = build(
            sources.clone(),
            Arc::new(InMemoryFingerprintStore::new()),
            Arc::new(SqliteJobRepository::new(storage)),
            Arc::new(PanickingSink),
            StubAdapter::new(SourceKind::Feed).returning("a", Ok(vec![good("a", "one")])),
            Arc::new(ManualClock::default()),
        );
        orchestrator
            .sync_catalog(&[Source::new("a", "A", SourceKind::Feed)])
            .unwrap();

        let report = orchestrator
            .run_acquisition(RunFilter::all(), false, CancelToken::new(), None)
            .await
            .unwrap();

        assert_eq!(report.jobs.len(), 1);
        let job = report.job("a").unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_kind(), Some(FetchErrorKind::StructuralParse));
        assert_eq!(job.error.as_ref().unwrap().message, "worker panicked");

        let stored = sources.get("a").unwrap().unwrap();
        assert_eq!(stored.consecutive_failures, 1);
        assert_eq!(stored.health_score, 80);
    }

    #[tokio::test]
    async fn test_record_race_loser_counts_as_duplicate() {
        let storage = SqliteStorage::in_memory().unwrap();
        let mut store = MockFingerprintStore::new();
        store.expect_seen().returning(|_| Ok(false));
        store
            .expect_record()
            .times(1)
            .returning(|f| Err(IngestError::DuplicateFingerprint(f.digest.clone())));
        let mut sink = MockContentSink::new();
        sink.expect_accept().times(0);

        let orchestrator = build(
            Arc::new(SqliteSourceRepository::new(storage.clone())),
            Arc::new(store),
            Arc::new(SqliteJobRepository::new(storage)),
            Arc::new(sink),
            StubAdapter::new(SourceKind::Feed).returning("a", Ok(vec![good("a", "one")])),
            Arc::new(ManualClock::default()),
        );
        orchestrator
            .sync_catalog(&[Source::new("a", "A", SourceKind::Feed)])
            .unwrap();

        let report = orchestrator
            .run_acquisition(RunFilter::all(), false, CancelToken::new(), None)
            .await
            .unwrap();
        let job = report.job("a").unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.counts.duplicates, 1);
        assert_eq!(job.counts.accepted, 0);
    }

    #[tokio::test]
    async fn test_store_failure_aborts_run() {
        let storage = SqliteStorage::in_memory().unwrap();
        let mut store = MockFingerprintStore::new();
        store.expect_seen().returning(|_| Ok(false));
        store
            .expect_record()
            .returning(|_| Err(IngestError::Database(rusqlite::Error::InvalidQuery)));

        let orchestrator = build(
            Arc::new(SqliteSourceRepository::new(storage.clone())),
            Arc::new(store),
            Arc::new(SqliteJobRepository::new(storage)),
            Arc::new(MockContentSink::new()),
            StubAdapter::new(SourceKind::Feed).returning("a", Ok(vec![good("a", "one")])),
            Arc::new(ManualClock::default()),
        );
        orchestrator
            .sync_catalog(&[Source::new("a", "A", SourceKind::Feed)])
            .unwrap();

        let result = orchestrator
            .run_acquisition(RunFilter::all(), false, CancelToken::new(), None)
            .await;
        assert!(matches!(result, Err(IngestError::Database(_))));
    }

    #[tokio::test]
    async fn test_rate_window_seeded_from_job_history_once() {
        let storage = SqliteStorage::in_memory().unwrap();
        let clock = Arc::new(ManualClock::default());
        let earlier = clock.now() - chrono::Duration::minutes(10);

        let mut jobs = MockJobRepository::new();
        jobs.expect_attempts_since()
            .withf(|id, _| id == "a")
            .times(1)
            .returning(move |_, _| Ok(vec![earlier]));
        jobs.expect_save().times(2).returning(|_, _| Ok(()));

        let orchestrator = build(
            Arc::new(SqliteSourceRepository::new(storage)),
            Arc::new(InMemoryFingerprintStore::new()),
            Arc::new(jobs),
            Arc::new(MockContentSink::new()),
            StubAdapter::new(SourceKind::Feed),
            clock,
        );
        orchestrator
            .sync_catalog(&[Source::new("a", "A", SourceKind::Feed).with_budget(RateBudget::new(1, 100))])
            .unwrap();

        for _ in 0..2 {
            let report = orchestrator
                .run_acquisition(RunFilter::all(), false, CancelToken::new(), None)
                .await
                .unwrap();
            let job = report.job("a").unwrap();
            assert_eq!(job.status, JobStatus::Skipped);
            assert_eq!(job.reason.as_deref(), Some("rate budget exhausted; retry in 3000s"));
        }
    }

    #[test]
    fn test_sync_catalog_leaves_breaker_owned_error() {
        let mut sources = MockSourceRepository::new();
        sources.expect_get().returning(|id| {
            let mut existing = Source::new(id, "A", SourceKind::Feed);
            existing.status = SourceStatus::Error;
            existing.disabled_at = Some(Utc::now());
            Ok(Some(existing))
        });
        sources.expect_set_status().times(0);
        sources.expect_upsert().times(1).returning(|_| Ok(()));

        let orchestrator = build(
            Arc::new(sources),
            Arc::new(InMemoryFingerprintStore::new()),
            Arc::new(MockJobRepository::new()),
            Arc::new(MockContentSink::new()),
            StubAdapter::new(SourceKind::Feed),
            Arc::new(ManualClock::default()),
        );

        let synced = orchestrator
            .sync_catalog(&[Source::new("a", "A", SourceKind::Feed)])
            .unwrap();
        assert_eq!(synced, 1);
    }

    #[tokio::test]
    async fn test_dry_run_leaves_store_and_sink_untouched() {
        let feed = StubAdapter::new(SourceKind::Feed)
            .returning("a", Ok(vec![good("a", "one"), good("a", "two")]));
        let mut sink = MockContentSink::new();
        sink.expect_accept().times(2).returning(|_| Ok(()));
        let fx = fixture(vec![feed], sink, vec![Source::new("a", "A", SourceKind::Feed)]);

        let dry = fx
            .orchestrator
            .run_acquisition(RunFilter::all(), true, CancelToken::new(), None)
            .await
            .unwrap();
        assert!(dry.dry_run);
        assert_eq!(dry.total_accepted, 2);
        assert_eq!(fx.fingerprints.count().unwrap(), 0);

        // The mock's times(2) is only satisfied by this real run
        let real = fx
            .orchestrator
            .run_acquisition(RunFilter::all(), false, CancelToken::new(), None)
            .await
            .unwrap();
        assert_eq!(real.total_accepted, 2);
        assert_eq!(fx.fingerprints.count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_sink_error_counted_job_still_succeeds() {
        let feed = StubAdapter::new(SourceKind::Feed).returning("a", Ok(vec![good("a", "one")]));
        let mut sink = MockContentSink::new();
        sink.expect_accept()
            .times(1)
            .returning(|_| Err(IngestError::Sink("downstream unavailable".to_string())));
        let fx = fixture(vec![feed], sink, vec![Source::new("a", "A", SourceKind::Feed)]);

        let report = fx
            .orchestrator
            .run_acquisition(RunFilter::all(), false, CancelToken::new(), None)
            .await
            .unwrap();
        let job = report.job("a").unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.counts.sink_errors, 1);
        // Fingerprint stays, so a retry sees a duplicate
        assert_eq!(fx.fingerprints.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_excluded_sources_explained() {
        let catalog = vec![
            Source::new("on", "On", SourceKind::Feed),
            Source::new("off", "Off", SourceKind::Feed).with_status(SourceStatus::Inactive),
            Source::new("fix", "Fix", SourceKind::Feed).with_status(SourceStatus::Maintenance),
            Source::new("es", "Es", SourceKind::Feed).with_language("es"),
        ];
        let fx = fixture(
            vec![StubAdapter::new(SourceKind::Feed)],
            MockContentSink::new(),
            catalog,
        );

        let report = fx
            .orchestrator
            .run_acquisition(RunFilter::all().languages(["en-GB"]), false, CancelToken::new(), None)
            .await
            .unwrap();

        assert_eq!(report.jobs.len(), 1);
        let reason = |id: &str| {
            report
                .excluded
                .iter()
                .find(|e| e.source_id == id)
                .map(|e| e.reason.clone())
                .unwrap()
        };
        assert_eq!(reason("off"), "inactive");
        assert_eq!(reason("fix"), "maintenance");
        assert!(reason("es").starts_with("filtered by language"));
    }

    #[tokio::test]
    async fn test_force_overrides_status_for_named_sources() {
        let fx = fixture(
            vec![StubAdapter::new(SourceKind::Feed)],
            MockContentSink::new(),
            vec![Source::new("off", "Off", SourceKind::Feed).with_status(SourceStatus::Inactive)],
        );

        let report = fx
            .orchestrator
            .run_acquisition(RunFilter::all().sources(["off"]).force(true), false, CancelToken::new(), None)
            .await
            .unwrap();
        assert_eq!(report.job("off").unwrap().status, JobStatus::Succeeded);

        let unnamed = fx
            .orchestrator
            .run_acquisition(RunFilter::all().force(true), false, CancelToken::new(), None)
            .await;
        assert!(matches!(unnamed, Err(IngestError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_zero_budget_always_skipped() {
        let fx = fixture(
            vec![StubAdapter::new(SourceKind::Feed)],
            MockContentSink::new(),
            vec![Source::new("z", "Z", SourceKind::Feed).with_budget(RateBudget::new(0, 10))],
        );

        let report = fx
            .orchestrator
            .run_acquisition(RunFilter::all(), false, CancelToken::new(), None)
            .await
            .unwrap();
        let job = report.job("z").unwrap();
        assert_eq!(job.status, JobStatus::Skipped);
        assert_eq!(job.reason.as_deref(), Some("no rate budget"));
    }

    #[tokio::test]
    async fn test_unknown_requested_source_is_fatal() {
        let fx = fixture(vec![], MockContentSink::new(), vec![]);
        let result = fx
            .orchestrator
            .run_acquisition(RunFilter::all().sources(["ghost"]), false, CancelToken::new(), None)
            .await;
        assert!(matches!(result, Err(IngestError::SourceNotFound(_))));
    }

    #[tokio::test]
    async fn test_missing_adapter_is_fatal_before_fetch() {
        let fx = fixture(
            vec![StubAdapter::new(SourceKind::Feed)],
            MockContentSink::new(),
            vec![],
        );
        // Bypass catalog validation to simulate a stale database row
        fx.sources
            .upsert(&Source::new("api", "Api", SourceKind::Api))
            .unwrap();

        let result = fx
            .orchestrator
            .run_acquisition(RunFilter::all(), false, CancelToken::new(), None)
            .await;
        assert!(matches!(result, Err(IngestError::UnsupportedSource(_))));
    }

    #[tokio::test]
    async fn test_deadline_cancels_slow_fetch_without_health_penalty() {
        let feed = StubAdapter::new(SourceKind::Feed)
            .returning("slow", Ok(vec![good("slow", "late")]))
            .slow(Duration::from_secs(5));
        let fx = fixture(vec![feed], MockContentSink::new(), vec![Source::new("slow", "Slow", SourceKind::Feed)]);

        let report = fx
            .orchestrator
            .run_acquisition(
                RunFilter::all(),
                false,
                CancelToken::new(),
                Some(Duration::from_millis(20)),
            )
            .await
            .unwrap();

        assert!(report.cancelled);
        let job = report.job("slow").unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_kind(), Some(FetchErrorKind::Cancelled));
        assert_eq!(
            fx.orchestrator.health().snapshot("slow").unwrap().consecutive_failures,
            0
        );
    }

    #[tokio::test]
    async fn test_pre_cancelled_run_fails_admitted_jobs() {
        let fx = fixture(
            vec![StubAdapter::new(SourceKind::Feed)],
            MockContentSink::new(),
            vec![
                Source::new("a", "A", SourceKind::Feed),
                Source::new("b", "B", SourceKind::Feed),
            ],
        );
        let cancel = CancelToken::new();
        cancel.cancel();

        let report = fx
            .orchestrator
            .run_acquisition(RunFilter::all(), false, cancel, None)
            .await
            .unwrap();
        assert_eq!(report.count_status(JobStatus::Failed), 2);
        assert!(report
            .jobs
            .iter()
            .all(|j| j.error_kind() == Some(FetchErrorKind::Cancelled)));
    }

    #[tokio::test]
    async fn test_reactivate_persists() {
        let fx = fixture(
            vec![StubAdapter::new(SourceKind::Feed)],
            MockContentSink::new(),
            vec![Source::new("a", "A", SourceKind::Feed)],
        );
        let mut broken = fx.sources.get("a").unwrap().unwrap();
        broken.status = SourceStatus::Error;
        broken.consecutive_failures = 5;
        broken.disabled_at = Some(Utc::now());
        fx.sources.save_health(&broken).unwrap();

        let health = fx.orchestrator.reactivate("a").unwrap();
        assert_eq!(health.status, SourceStatus::Active);

        let stored = fx.sources.get("a").unwrap().unwrap();
        assert_eq!(stored.status, SourceStatus::Active);
        assert_eq!(stored.consecutive_failures, 0);
    }
}
