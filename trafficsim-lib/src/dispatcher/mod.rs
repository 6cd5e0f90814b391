//! Rate-paced request dispatcher.
//!
//! A [`Dispatcher`] fires synthetic GET requests at a fixed tick,
//! `requests_per_tick` at a time, spread over a weighted [`TargetPool`].
//! Requests are fire-and-forget tasks; their outcome only feeds the stats.

use std::{
    fmt,
    sync::{Arc, Weak},
    time::Duration,
};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use rama::{
    Service,
    error::{BoxError, ErrorContext as _},
    graceful::{ShutdownGuard, WeakShutdownGuard},
    http::{BodyExtractExt as _, Request, Response, StatusCode},
    rt::Executor,
    service::BoxService,
    telemetry::tracing,
};
use serde::Serialize;
use tokio::{
    sync::{Semaphore, SemaphorePermit, TryAcquireError},
    time::MissedTickBehavior,
};

pub mod pacing;
pub mod pool;
pub mod request;
mod stats;

pub use self::{
    pacing::TickPlan,
    pool::{BackendSpec, BackendUpdate, BackendView, TargetPool, UnknownBackendError},
    stats::{RequestOutcome, StatsSnapshot},
};

use self::stats::{Stats, round2};

pub const DEFAULT_MAX_RPS: u32 = 25_000;
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(5);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_CONNECTIONS: usize = 2_000;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// highest rate `start` accepts
    pub max_rps: u32,
    pub tick_interval: Duration,
    /// deadline per request, connection slot queueing included
    pub request_timeout: Duration,
    /// amount of outbound connection slots
    pub max_connections: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_rps: DEFAULT_MAX_RPS,
            tick_interval: DEFAULT_TICK_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct InvalidRateError {
    pub rps: i64,
    pub max_rps: u32,
}

impl fmt::Display for InvalidRateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RPS must be between 1 and {} (got {})",
            self.max_rps, self.rps
        )
    }
}

impl std::error::Error for InvalidRateError {}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatcherStatus {
    pub running: bool,
    pub target_rps: u32,
    /// completed requests per second since the baseline
    pub actual_rps: f64,
    pub plan: Option<TickPlan>,
    pub stats: StatsSnapshot,
}

/// Shared handle to a rate-paced dispatcher.
///
/// Created stopped. Cloning is cheap, all clones drive the same schedule.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("cfg", &self.inner.cfg)
            .field("schedule", &*self.inner.schedule.lock())
            .finish()
    }
}

struct Inner {
    exec: Executor,
    guard: WeakShutdownGuard,
    client: BoxService<Request, Response, BoxError>,
    cfg: DispatcherConfig,

    pool: ArcSwap<TargetPool>,
    schedule: Mutex<Option<Schedule>>,
    next_generation: Mutex<u64>,

    stats: Stats,
    connection_slots: Semaphore,
}

#[derive(Debug, Clone, Copy)]
struct Schedule {
    plan: TickPlan,
    // tick loops of older generations exit on their next tick
    generation: u64,
}

impl Dispatcher {
    pub fn new(
        guard: ShutdownGuard,
        client: impl Service<Request, Output = Response, Error = BoxError>,
        cfg: DispatcherConfig,
        pool: TargetPool,
    ) -> Self {
        let connection_slots = Semaphore::new(cfg.max_connections.max(1));
        Self {
            inner: Arc::new(Inner {
                exec: Executor::graceful(guard.clone()),
                guard: guard.clone_weak(),
                client: client.boxed(),
                cfg,
                pool: ArcSwap::from_pointee(pool),
                schedule: Mutex::new(None),
                next_generation: Mutex::new(0),
                stats: Stats::default(),
                connection_slots,
            }),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.inner.cfg
    }

    /// Start (or retarget) the schedule at `rps` requests per second.
    ///
    /// Starting at the rate already running is a no-op.
    /// Any other start replaces the running schedule:
    /// the old one never fires again once this returns.
    pub fn start(&self, rps: i64) -> Result<TickPlan, InvalidRateError> {
        let max_rps = self.inner.cfg.max_rps;
        let rps = u32::try_from(rps)
            .ok()
            .filter(|rps| (1..=max_rps).contains(rps))
            .ok_or(InvalidRateError { rps, max_rps })?;

        let mut schedule = self.inner.schedule.lock();
        if let Some(current) = schedule.as_ref()
            && current.plan.rps == rps
        {
            tracing::debug!(rps, "dispatcher already running at requested rate");
            return Ok(current.plan);
        }

        let plan = TickPlan::new(rps, self.inner.cfg.tick_interval);
        let generation = {
            let mut next = self.inner.next_generation.lock();
            *next += 1;
            *next
        };
        let previous = schedule.replace(Schedule { plan, generation });
        self.inner.stats.anchor_baseline();

        self.inner.exec.spawn_task(run_tick_loop(
            Arc::downgrade(&self.inner),
            self.inner.guard.clone(),
            plan,
            generation,
        ));

        tracing::info!(
            rps,
            previous_rps = ?previous.map(|s| s.plan.rps),
            requests_per_tick = plan.requests_per_tick,
            tick_interval = ?plan.tick_interval,
            effective_rps = plan.effective_rps(),
            "traffic dispatcher started",
        );
        Ok(plan)
    }

    /// Stop the schedule. Requests already in flight run to completion.
    ///
    /// Idempotent; returns the stats as they are at the moment of stopping.
    pub fn stop(&self) -> StatsSnapshot {
        if let Some(previous) = self.inner.schedule.lock().take() {
            tracing::info!(rps = previous.plan.rps, "traffic dispatcher stopped");
        }
        self.inner.stats.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.inner.schedule.lock().is_some()
    }

    pub fn status(&self) -> DispatcherStatus {
        let plan = self.inner.schedule.lock().map(|s| s.plan);
        let stats = self.inner.stats.snapshot();

        let uptime = self.inner.stats.uptime_secs();
        let actual_rps = if uptime > 0. {
            round2(stats.total as f64 / uptime)
        } else {
            0.
        };

        DispatcherStatus {
            running: plan.is_some(),
            target_rps: plan.map(|plan| plan.rps).unwrap_or_default(),
            actual_rps,
            plan,
            stats,
        }
    }

    /// Zero all counters.
    ///
    /// The baseline restarts from now when running, and is cleared otherwise.
    pub fn reset_stats(&self) -> StatsSnapshot {
        let schedule = self.inner.schedule.lock();
        self.inner.stats.reset_counters();
        if schedule.is_some() {
            self.inner.stats.anchor_baseline();
        } else {
            self.inner.stats.clear_baseline();
        }
        drop(schedule);

        tracing::info!("traffic dispatcher stats reset");
        self.inner.stats.snapshot()
    }

    pub fn backends(&self) -> Vec<BackendView> {
        self.inner.pool.load().views()
    }

    /// Change the routing input of one pool member,
    /// effective for all requests dispatched afterwards.
    pub fn update_backend(&self, update: &BackendUpdate) -> Result<BackendView, UnknownBackendError> {
        let mut result = None;
        self.inner.pool.rcu(|pool| match pool.with_update(update) {
            Ok((pool, view)) => {
                result = Some(Ok(view));
                Arc::new(pool)
            }
            Err(err) => {
                result = Some(Err(err));
                pool.clone()
            }
        });
        let view = result.unwrap_or_else(|| Err(UnknownBackendError(update.id.as_str().into())))?;

        tracing::info!(
            backend.id = %view.id,
            weight = view.weight,
            circuit_state = %view.circuit_state,
            ramp_up_pct = view.ramp_up_pct,
            effective_weight = view.effective_weight,
            "target pool member updated",
        );
        Ok(view)
    }
}

async fn run_tick_loop(
    dispatcher: Weak<Inner>,
    guard: WeakShutdownGuard,
    plan: TickPlan,
    generation: u64,
) {
    let mut cancelled = std::pin::pin!(guard.into_cancelled());

    let mut ticker = tokio::time::interval(plan.tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);

    loop {
        tokio::select! {
            _ = cancelled.as_mut() => {
                tracing::debug!(generation, "exit tick loop: guard shutdown");
                return;
            }
            _ = ticker.tick() => {}
        }

        let Some(inner) = dispatcher.upgrade() else {
            tracing::debug!(generation, "exit tick loop: dispatcher dropped");
            return;
        };
        if !inner.fire_tick(generation, plan.requests_per_tick) {
            tracing::debug!(generation, "exit tick loop: schedule replaced or stopped");
            return;
        }
    }
}

impl Inner {
    /// Spawn one batch of requests, unless `generation` is no longer current.
    fn fire_tick(self: &Arc<Self>, generation: u64, requests_per_tick: u32) -> bool {
        // held while spawning, so a concurrent stop or restart
        // can not interleave with a batch of an older schedule
        let schedule = self.schedule.lock();
        if schedule.map(|s| s.generation) != Some(generation) {
            return false;
        }
        for _ in 0..requests_per_tick {
            self.exec.spawn_task(dispatch_one(self.clone()));
        }
        true
    }

    async fn send(&self, req: Request) -> Result<StatusCode, BoxError> {
        let _slot = self.acquire_connection_slot().await?;
        let resp = self.client.serve(req).await?;
        let status = resp.status();
        // drain so the connection can be reused
        let _ = resp.try_into_string().await;
        Ok(status)
    }

    async fn acquire_connection_slot(&self) -> Result<SemaphorePermit<'_>, BoxError> {
        match self.connection_slots.try_acquire() {
            Ok(permit) => Ok(permit),
            Err(TryAcquireError::NoPermits) => {
                self.stats.record_pool_saturated();
                self.connection_slots
                    .acquire()
                    .await
                    .context("wait for connection slot")
            }
            Err(TryAcquireError::Closed) => Err(BoxError::from("connection slots closed")),
        }
    }
}

async fn dispatch_one(inner: Arc<Inner>) {
    let _in_flight = inner.stats.enter_in_flight();

    let req = {
        let pool = inner.pool.load();
        let Some(target) = pool.select(&mut rand::rng()) else {
            tracing::trace!("no eligible target in pool: request failed");
            inner.stats.record(RequestOutcome::Failed);
            return;
        };
        request::new_load_request(target)
    };
    let req = match req {
        Ok(req) => req,
        Err(err) => {
            tracing::debug!("failed to create load request: {err}");
            inner.stats.record(RequestOutcome::Failed);
            return;
        }
    };

    let outcome = match tokio::time::timeout(inner.cfg.request_timeout, inner.send(req)).await {
        Ok(Ok(status)) if request::is_success(status) => RequestOutcome::Succeeded,
        Ok(Ok(status)) => {
            tracing::trace!(%status, "load request failed: http status");
            RequestOutcome::Failed
        }
        Ok(Err(err)) => {
            tracing::trace!("load request failed: {err}");
            RequestOutcome::Failed
        }
        Err(_) => RequestOutcome::TimedOut,
    };
    inner.stats.record(outcome);
}

#[cfg(test)]
mod tests;
