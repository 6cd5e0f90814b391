use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use arc_swap::ArcSwapOption;
use serde::Serialize;
use tokio::time::Instant;

/// How a single dispatched request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// response status in `200..400`
    Succeeded,
    /// any other status, transport error or no eligible target
    Failed,
    /// no response within the request timeout
    TimedOut,
}

/// Aggregate counters of a dispatcher.
#[derive(Debug, Default)]
pub(super) struct Stats {
    total: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    timeouts: AtomicU64,
    pool_saturated: AtomicU64,
    in_flight: AtomicU64,

    baseline: ArcSwapOption<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub timeouts: u64,
    pub pool_saturated: u64,
    pub in_flight: u64,
    /// seconds since the baseline, `0` if there is none
    pub uptime: f64,
    /// percentage of `total` that succeeded
    pub success_rate: f64,
}

impl Stats {
    pub(super) fn record(&self, outcome: RequestOutcome) {
        let counter = match outcome {
            RequestOutcome::Succeeded => &self.succeeded,
            RequestOutcome::Failed => &self.failed,
            RequestOutcome::TimedOut => &self.timeouts,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::AcqRel);
    }

    pub(super) fn record_pool_saturated(&self) {
        self.pool_saturated.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn enter_in_flight(&self) -> InFlightGuard<'_> {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        InFlightGuard { stats: self }
    }

    pub(super) fn anchor_baseline(&self) {
        self.baseline.store(Some(Arc::new(Instant::now())));
    }

    pub(super) fn clear_baseline(&self) {
        self.baseline.store(None);
    }

    /// Zero all counters. The in-flight gauge is left alone.
    pub(super) fn reset_counters(&self) {
        for counter in [
            &self.total,
            &self.succeeded,
            &self.failed,
            &self.timeouts,
            &self.pool_saturated,
        ] {
            counter.store(0, Ordering::Release);
        }
    }

    pub(super) fn total(&self) -> u64 {
        self.total.load(Ordering::Acquire)
    }

    pub(super) fn uptime_secs(&self) -> f64 {
        self.baseline
            .load()
            .as_deref()
            .map(|start| start.elapsed().as_secs_f64())
            .unwrap_or_default()
    }

    pub(super) fn snapshot(&self) -> StatsSnapshot {
        let total = self.total();
        let succeeded = self.succeeded.load(Ordering::Relaxed);
        let success_rate = if total > 0 {
            round2(100. * succeeded as f64 / total as f64)
        } else {
            0.
        };

        StatsSnapshot {
            total,
            succeeded,
            failed: self.failed.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            pool_saturated: self.pool_saturated.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Acquire),
            uptime: round2(self.uptime_secs()),
            success_rate,
        }
    }
}

pub(super) struct InFlightGuard<'a> {
    stats: &'a Stats,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.stats.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

pub(super) fn round2(value: f64) -> f64 {
    (value * 100.).round() / 100.
}
