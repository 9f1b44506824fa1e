//! Per-source request budgets over rolling hourly and daily windows.
//!
//! Windows are exact sliding logs: every attempt timestamp inside the last
//! 24 hours is kept (at most `max_per_day` per source), and a window has
//! capacity again as soon as its oldest attempt ages out. No fixed buckets,
//! so there is no burst-at-boundary allowance.
//!
//! The log lives in memory but is seeded once per source from persisted job
//! history (`restore`), so budgets and remote holds carry across processes.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

use crate::clock::Clock;
use crate::domain::RateBudget;

fn hour() -> chrono::Duration {
    chrono::Duration::hours(1)
}

fn day() -> chrono::Duration {
    chrono::Duration::days(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// `retry_after` is `None` when the source can never be admitted.
    Denied { retry_after: Option<Duration> },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed)
    }
}

#[derive(Debug, Default)]
struct Window {
    budget: RateBudget,
    attempts: VecDeque<DateTime<Utc>>,
    hold_until: Option<DateTime<Utc>>,
    restored: bool,
}

impl Window {
    fn evict(&mut self, now: DateTime<Utc>) {
        while matches!(self.attempts.front(), Some(t) if *t <= now - day()) {
            self.attempts.pop_front();
        }
        if matches!(self.hold_until, Some(until) if until <= now) {
            self.hold_until = None;
        }
    }

    fn hourly(&self, now: DateTime<Utc>) -> usize {
        self.attempts.iter().filter(|t| **t > now - hour()).count()
    }

    fn check(&self, now: DateTime<Utc>) -> Admission {
        if self.budget.is_zero() {
            return Admission::Denied { retry_after: None };
        }

        let mut wait: Option<chrono::Duration> = None;
        let mut extend = |d: chrono::Duration| {
            wait = Some(wait.map_or(d, |w| w.max(d)));
        };

        if let Some(until) = self.hold_until {
            extend(until - now);
        }

        let hourly = self.hourly(now);
        if hourly >= self.budget.max_per_hour as usize {
            // The oldest attempt still inside the hour frees the first slot
            let excess = hourly - self.budget.max_per_hour as usize;
            if let Some(t) = self.attempts.iter().filter(|t| **t > now - hour()).nth(excess) {
                extend(*t + hour() - now);
            }
        }

        let daily = self.attempts.len();
        if daily >= self.budget.max_per_day as usize {
            let excess = daily - self.budget.max_per_day as usize;
            if let Some(t) = self.attempts.get(excess) {
                extend(*t + day() - now);
            }
        }

        match wait {
            Some(w) => Admission::Denied {
                retry_after: Some(w.to_std().unwrap_or(Duration::ZERO)),
            },
            None => Admission::Allowed,
        }
    }
}

/// Sources never contend on each other's counters; the map shards its locks.
pub struct RateLimiter {
    windows: DashMap<String, Window>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: DashMap::new(),
            clock,
        }
    }

    /// Register or update a source's budget. Recorded attempts are kept.
    pub fn configure(&self, source_id: &str, budget: RateBudget) {
        self.windows.entry(source_id.to_string()).or_default().budget = budget;
    }

    /// Whether `restore` already ran for this source.
    pub fn is_restored(&self, source_id: &str) -> bool {
        self.windows
            .get(source_id)
            .map(|w| w.restored)
            .unwrap_or(false)
    }

    /// Seed a window with attempts and a hold recorded by earlier processes.
    /// Only the first call per source has any effect.
    pub fn restore(
        &self,
        source_id: &str,
        attempts: Vec<DateTime<Utc>>,
        hold_until: Option<DateTime<Utc>>,
    ) {
        let now = self.clock.now();
        let mut window = self.windows.entry(source_id.to_string()).or_default();
        if window.restored {
            return;
        }

        window.attempts.extend(attempts);
        window.attempts.make_contiguous().sort();
        if let Some(until) = hold_until {
            window.hold_until = Some(window.hold_until.map_or(until, |h| h.max(until)));
        }
        window.restored = true;
        window.evict(now);
        debug!(
            source = source_id,
            daily = window.attempts.len(),
            hold_until = ?window.hold_until,
            "restored rate window"
        );
    }

    /// Pure check. Never records anything.
    pub fn try_acquire(&self, source_id: &str) -> Admission {
        let now = self.clock.now();
        match self.windows.get_mut(source_id) {
            Some(mut window) => {
                window.evict(now);
                window.check(now)
            }
            None => Admission::Denied { retry_after: None },
        }
    }

    /// Record a fetch attempt. The capacity check and the increment happen
    /// under the same entry lock, so concurrent callers can never push a
    /// source past its budget; a denied attempt is not recorded.
    pub fn record_attempt(&self, source_id: &str) -> Admission {
        let now = self.clock.now();
        let Some(mut window) = self.windows.get_mut(source_id) else {
            return Admission::Denied { retry_after: None };
        };

        window.evict(now);
        let admission = window.check(now);
        if admission.is_allowed() {
            window.attempts.push_back(now);
            debug!(
                source = source_id,
                hourly = window.hourly(now),
                daily = window.attempts.len(),
                "recorded fetch attempt"
            );
        }
        admission
    }

    /// Back off a source that the remote side throttled, independently of
    /// our own counters. Returns the effective end of the hold.
    pub fn hold(&self, source_id: &str, retry_after: Duration) -> DateTime<Utc> {
        let until = self.clock.now()
            + chrono::Duration::from_std(retry_after).unwrap_or(chrono::Duration::zero());
        let mut window = self.windows.entry(source_id.to_string()).or_default();
        let until = window.hold_until.map_or(until, |h| h.max(until));
        window.hold_until = Some(until);
        until
    }

    /// (hourly, daily) attempts currently inside the windows.
    pub fn usage(&self, source_id: &str) -> (usize, usize) {
        let now = self.clock.now();
        self.windows
            .get(source_id)
            .map(|w| {
                let daily = w.attempts.iter().filter(|t| **t > now - day()).count();
                (w.hourly(now), daily)
            })
            .unwrap_or((0, 0))
    }
}
