//! Per-source circuit breaker.
//!
//! `Healthy -> Degraded -> Disabled`. A source is disabled (status `error`)
//! once its consecutive failures reach the threshold and stays ineligible
//! until `reactivate` is called. When a cooldown is configured, a disabled
//! source becomes eligible again for a single trial fetch after the
//! cooldown; its success closes the breaker, its failure restarts it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::clock::Clock;
use crate::domain::{Source, SourceStatus};
use crate::errors::{FetchErrorKind, IngestError, IngestResult};

#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub failure_threshold: u32,
    pub success_increment: u8,
    pub failure_decrement: u8,
    /// Scores below this count as degraded.
    pub degraded_below: u8,
    /// `None` means only `reactivate` closes the breaker.
    pub cooldown: Option<Duration>,
    pub count_transient: bool,
    pub count_structural: bool,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_increment: 10,
            failure_decrement: 20,
            degraded_below: 70,
            cooldown: None,
            count_transient: true,
            count_structural: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceHealth {
    pub status: SourceStatus,
    pub score: u8,
    pub consecutive_failures: u32,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub disabled_at: Option<DateTime<Utc>>,
}

impl SourceHealth {
    fn from_source(source: &Source) -> Self {
        Self {
            status: source.status,
            score: source.health_score.min(100),
            consecutive_failures: source.consecutive_failures,
            last_success_at: source.last_success_at,
            last_attempt_at: source.last_attempt_at,
            disabled_at: source.disabled_at,
        }
    }

    /// Copy the health fields back onto a source for persistence.
    pub fn apply_to(&self, source: &mut Source) {
        source.status = self.status;
        source.health_score = self.score;
        source.consecutive_failures = self.consecutive_failures;
        source.last_success_at = self.last_success_at;
        source.last_attempt_at = self.last_attempt_at;
        source.disabled_at = self.disabled_at;
    }
}

pub struct HealthMonitor {
    records: DashMap<String, SourceHealth>,
    config: HealthConfig,
    clock: Arc<dyn Clock>,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            records: DashMap::new(),
            config,
            clock,
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Load (or reload) a source's persisted health.
    pub fn observe(&self, source: &Source) {
        self.records
            .insert(source.id.clone(), SourceHealth::from_source(source));
    }

    /// Whether a failure of this kind feeds the consecutive-failure count.
    pub fn counts_failure(&self, kind: FetchErrorKind) -> bool {
        match kind {
            FetchErrorKind::TransientNetwork => self.config.count_transient,
            FetchErrorKind::StructuralParse => self.config.count_structural,
            FetchErrorKind::RemoteRateLimited | FetchErrorKind::Cancelled => false,
        }
    }

    pub fn record_outcome(&self, source_id: &str, success: bool) -> IngestResult<SourceHealth> {
        let now = self.clock.now();
        let mut record = self
            .records
            .get_mut(source_id)
            .ok_or_else(|| IngestError::SourceNotFound(source_id.to_string()))?;

        record.last_attempt_at = Some(now);

        if success {
            record.consecutive_failures = 0;
            record.score = record
                .score
                .saturating_add(self.config.success_increment)
                .min(100);
            record.last_success_at = Some(now);

            // Only a breaker trip is undone; operator-set states stay put
            if record.status == SourceStatus::Error && record.disabled_at.is_some() {
                record.status = SourceStatus::Active;
                record.disabled_at = None;
                info!(source = source_id, "circuit closed after successful fetch");
            }
        } else {
            record.consecutive_failures = record.consecutive_failures.saturating_add(1);
            record.score = record.score.saturating_sub(self.config.failure_decrement);

            if record.consecutive_failures >= self.config.failure_threshold {
                match record.status {
                    SourceStatus::Active => {
                        record.status = SourceStatus::Error;
                        record.disabled_at = Some(now);
                        warn!(
                            source = source_id,
                            failures = record.consecutive_failures,
                            "circuit opened; source disabled"
                        );
                    }
                    SourceStatus::Error if record.disabled_at.is_some() => {
                        // Failed trial restarts the cooldown
                        record.disabled_at = Some(now);
                    }
                    _ => {}
                }
            }
        }

        Ok(record.clone())
    }

    /// Stamp an attempt whose outcome says nothing about the source itself.
    pub fn touch(&self, source_id: &str) -> IngestResult<SourceHealth> {
        let mut record = self
            .records
            .get_mut(source_id)
            .ok_or_else(|| IngestError::SourceNotFound(source_id.to_string()))?;
        record.last_attempt_at = Some(self.clock.now());
        Ok(record.clone())
    }

    pub fn is_eligible(&self, source_id: &str) -> bool {
        let Some(record) = self.records.get(source_id) else {
            return false;
        };

        match record.status {
            SourceStatus::Active => true,
            SourceStatus::Error => match (self.config.cooldown, record.disabled_at) {
                (Some(cooldown), Some(disabled_at)) => {
                    let cooldown = chrono::Duration::from_std(cooldown)
                        .unwrap_or(chrono::Duration::MAX);
                    self.clock.now() >= disabled_at + cooldown
                }
                _ => false,
            },
            SourceStatus::Inactive | SourceStatus::Maintenance => false,
        }
    }

    /// Manual override: clears the breaker and makes the source active.
    pub fn reactivate(&self, source_id: &str) -> IngestResult<SourceHealth> {
        let mut record = self
            .records
            .get_mut(source_id)
            .ok_or_else(|| IngestError::SourceNotFound(source_id.to_string()))?;

        record.status = SourceStatus::Active;
        record.consecutive_failures = 0;
        record.disabled_at = None;
        info!(source = source_id, "source reactivated");

        Ok(record.clone())
    }

    pub fn snapshot(&self, source_id: &str) -> Option<SourceHealth> {
        self.records.get(source_id).map(|r| r.clone())
    }

    pub fn state(&self, source_id: &str) -> Option<HealthState> {
        self.records.get(source_id).map(|r| {
            if r.status == SourceStatus::Error {
                HealthState::Disabled
            } else if r.consecutive_failures > 0 || r.score < self.config.degraded_below {
                HealthState::Degraded
            } else {
                HealthState::Healthy
            }
        })
    }
}
