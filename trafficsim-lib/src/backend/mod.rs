//! Capacity-aware backend load model.
//!
//! A [`BackendLoadModel`] simulates a single upstream service.
//! Latency and error rate are flat until the load crosses a knee,
//! after which both grow linearly: first the service slows down,
//! and only closer to its capacity it starts failing.
//! Above capacity requests are rejected at admission.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU32, AtomicU64, Ordering},
    },
    time::Duration,
};

use rama::{telemetry::tracing, utils::str::arcstr::ArcStr};
use rand::RngExt as _;
use serde::Serialize;

/// Load percentage from which latency starts to grow.
pub const LATENCY_KNEE_PCT: f64 = 60.;
/// Extra milliseconds per load percent above [`LATENCY_KNEE_PCT`].
pub const LATENCY_SLOPE_MS: f64 = 3.;
/// Load percentage from which the error rate starts to grow.
pub const ERROR_KNEE_PCT: f64 = 80.;
/// Extra error percentage points per load percent above [`ERROR_KNEE_PCT`].
pub const ERROR_SLOPE_PCT: f64 = 1.5;

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub id: ArcStr,
    pub base_latency_ms: u64,
    /// concurrent request ceiling, at least 1
    pub max_capacity: u32,
}

/// Shared handle to the state of one simulated backend.
///
/// Cloning is cheap and all clones observe the same state.
#[derive(Debug, Clone)]
pub struct BackendLoadModel {
    inner: Arc<ModelState>,
}

#[derive(Debug)]
struct ModelState {
    id: ArcStr,
    base_latency_ms: u64,
    max_capacity: u32,

    // admin overlay, last write wins
    injected_latency_ms: AtomicU64,
    injected_error_rate_bits: AtomicU64,

    in_flight: AtomicU32,
}

/// Latency and error probability the model applies at a given load.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadProfile {
    pub load_pct: f64,
    pub latency: Duration,
    pub error_rate_pct: f64,
}

impl LoadProfile {
    /// `roll` is a uniform sample in `[0, 100)`.
    pub fn is_fault(&self, roll: f64) -> bool {
        roll < self.error_rate_pct
    }
}

/// Successfully served simulated request.
#[derive(Debug, Clone, Copy)]
pub struct Served {
    pub latency: Duration,
    pub concurrent: u32,
    pub load_pct: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct OverCapacityError {
    pub in_flight: u32,
    pub max_capacity: u32,
}

impl fmt::Display for OverCapacityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "over capacity: {} in flight exceeds capacity of {}",
            self.in_flight, self.max_capacity
        )
    }
}

impl std::error::Error for OverCapacityError {}

#[derive(Debug, Clone, Copy)]
pub struct InjectedFault {
    pub latency: Duration,
    pub error_rate_pct: f64,
}

impl fmt::Display for InjectedFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "injected fault (error rate {:.2}%) after {:?}",
            self.error_rate_pct, self.latency
        )
    }
}

impl std::error::Error for InjectedFault {}

#[derive(Debug, Clone, Copy)]
pub enum HandleError {
    OverCapacity(OverCapacityError),
    Injected(InjectedFault),
}

impl fmt::Display for HandleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandleError::OverCapacity(err) => err.fmt(f),
            HandleError::Injected(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for HandleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HandleError::OverCapacity(err) => Some(err),
            HandleError::Injected(err) => Some(err),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyInjection {
    pub backend_id: ArcStr,
    pub injected_latency: u64,
    pub total_latency: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInjection {
    pub backend_id: ArcStr,
    pub injected_error_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendStatus {
    pub backend_id: ArcStr,
    pub base_latency: u64,
    pub injected_latency: u64,
    pub total_latency: u64,
    pub injected_error_rate_pct: f64,
    pub max_capacity: u32,
    pub current_concurrent: u32,
}

impl BackendLoadModel {
    pub fn new(cfg: BackendConfig) -> Self {
        Self {
            inner: Arc::new(ModelState {
                id: cfg.id,
                base_latency_ms: cfg.base_latency_ms,
                max_capacity: cfg.max_capacity.max(1),
                injected_latency_ms: AtomicU64::new(0),
                injected_error_rate_bits: AtomicU64::new(0f64.to_bits()),
                in_flight: AtomicU32::new(0),
            }),
        }
    }

    pub fn id(&self) -> &ArcStr {
        &self.inner.id
    }

    pub fn base_latency_ms(&self) -> u64 {
        self.inner.base_latency_ms
    }

    pub fn max_capacity(&self) -> u32 {
        self.inner.max_capacity
    }

    pub fn in_flight(&self) -> u32 {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    pub fn injected_latency_ms(&self) -> u64 {
        self.inner.injected_latency_ms.load(Ordering::Relaxed)
    }

    pub fn injected_error_rate_pct(&self) -> f64 {
        f64::from_bits(self.inner.injected_error_rate_bits.load(Ordering::Relaxed))
    }

    pub fn inject_latency(&self, latency_ms: u64) -> LatencyInjection {
        self.inner
            .injected_latency_ms
            .store(latency_ms, Ordering::Relaxed);
        tracing::info!(backend.id = %self.inner.id, latency_ms, "latency injected");

        LatencyInjection {
            backend_id: self.inner.id.clone(),
            injected_latency: latency_ms,
            total_latency: self.inner.base_latency_ms.saturating_add(latency_ms),
        }
    }

    /// Set the injected error rate, clamped to `[0, 100]` (NaN means 0).
    pub fn inject_errors(&self, error_rate_pct: f64) -> ErrorInjection {
        let pct = if error_rate_pct.is_nan() {
            0.
        } else {
            error_rate_pct.clamp(0., 100.)
        };
        self.inner
            .injected_error_rate_bits
            .store(pct.to_bits(), Ordering::Relaxed);
        tracing::info!(backend.id = %self.inner.id, error_rate_pct = pct, "errors injected");

        ErrorInjection {
            backend_id: self.inner.id.clone(),
            injected_error_rate: pct,
        }
    }

    pub fn reset(&self) {
        self.inner.injected_latency_ms.store(0, Ordering::Relaxed);
        self.inner
            .injected_error_rate_bits
            .store(0f64.to_bits(), Ordering::Relaxed);
        tracing::info!(backend.id = %self.inner.id, "fault injection reset to baseline");
    }

    pub fn status(&self) -> BackendStatus {
        let injected_latency = self.injected_latency_ms();
        BackendStatus {
            backend_id: self.inner.id.clone(),
            base_latency: self.inner.base_latency_ms,
            injected_latency,
            total_latency: self.inner.base_latency_ms.saturating_add(injected_latency),
            injected_error_rate_pct: self.injected_error_rate_pct(),
            max_capacity: self.inner.max_capacity,
            current_concurrent: self.in_flight(),
        }
    }

    /// Profile for `in_flight` concurrent requests (the current one included),
    /// using the current fault overlay.
    pub fn load_profile(&self, in_flight: u32) -> LoadProfile {
        let load_pct = 100. * in_flight as f64 / self.inner.max_capacity as f64;

        let latency_ms = self.inner.base_latency_ms as f64
            + self.injected_latency_ms() as f64
            + (load_pct - LATENCY_KNEE_PCT).max(0.) * LATENCY_SLOPE_MS;
        let error_rate_pct =
            self.injected_error_rate_pct() + (load_pct - ERROR_KNEE_PCT).max(0.) * ERROR_SLOPE_PCT;

        LoadProfile {
            load_pct,
            latency: Duration::from_nanos((latency_ms * 1_000_000.).round() as u64),
            error_rate_pct,
        }
    }

    /// Serve one simulated request.
    ///
    /// The in-flight slot taken on entry is released on every exit path,
    /// including this future being dropped mid-sleep.
    pub async fn handle(&self) -> Result<Served, HandleError> {
        let (_slot, in_flight) = InFlightSlot::enter(&self.inner.in_flight);

        if in_flight > self.inner.max_capacity {
            tracing::debug!(
                backend.id = %self.inner.id,
                in_flight,
                max_capacity = self.inner.max_capacity,
                "reject request: over capacity",
            );
            return Err(HandleError::OverCapacity(OverCapacityError {
                in_flight,
                max_capacity: self.inner.max_capacity,
            }));
        }

        let profile = self.load_profile(in_flight);
        if !profile.latency.is_zero() {
            tokio::time::sleep(profile.latency).await;
        }

        let roll = rand::rng().random_range(0.0..100.0);
        if profile.is_fault(roll) {
            return Err(HandleError::Injected(InjectedFault {
                latency: profile.latency,
                error_rate_pct: profile.error_rate_pct,
            }));
        }

        Ok(Served {
            latency: profile.latency,
            concurrent: in_flight,
            load_pct: profile.load_pct,
        })
    }
}

/// Scope guard for one in-flight request.
struct InFlightSlot<'a> {
    counter: &'a AtomicU32,
}

impl<'a> InFlightSlot<'a> {
    /// Take a slot, returning it together with the in-flight count it produced.
    fn enter(counter: &'a AtomicU32) -> (Self, u32) {
        let in_flight = counter.fetch_add(1, Ordering::AcqRel) + 1;
        (Self { counter }, in_flight)
    }
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}
