//! Effective-weight routing rule.
//!
//! This is the backend selection rule a load balancing proxy
//! in front of simulated backends is expected to apply.
//! It is shared by the generator (when spreading load over a pool directly)
//! and by anything that wants to predict how the proxy splits traffic.

use std::fmt;

use rand::RngExt;
use serde::{Deserialize, Serialize};

/// Share of its weight a half-open backend keeps, enough for probe traffic.
pub const HALF_OPEN_TRICKLE_FACTOR: f64 = 0.05;

/// Static weights are clamped to `0..=MAX_WEIGHT`.
pub const MAX_WEIGHT: u32 = 100;

/// Circuit breaker state of a backend, as seen by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// normal operation
    #[default]
    Closed,
    /// no traffic at all
    Open,
    /// trickle of probe traffic only
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Routing relevant state of a single backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoutingInput {
    weight: u32,
    circuit_state: CircuitState,
    ramp_up_pct: f64,
}

impl RoutingInput {
    /// A closed, fully ramped up backend with the given weight.
    pub fn new(weight: u32) -> Self {
        Self {
            weight: weight.min(MAX_WEIGHT),
            circuit_state: CircuitState::Closed,
            ramp_up_pct: 100.,
        }
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn set_weight(&mut self, weight: u32) {
        self.weight = weight.min(MAX_WEIGHT);
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.circuit_state
    }

    pub fn set_circuit_state(&mut self, state: CircuitState) {
        self.circuit_state = state;
    }

    pub fn with_circuit_state(mut self, state: CircuitState) -> Self {
        self.set_circuit_state(state);
        self
    }

    pub fn ramp_up_pct(&self) -> f64 {
        self.ramp_up_pct
    }

    /// NaN is treated as "not ramped up at all".
    pub fn set_ramp_up_pct(&mut self, pct: f64) {
        self.ramp_up_pct = if pct.is_nan() { 0. } else { pct.clamp(0., 100.) };
    }

    pub fn with_ramp_up_pct(mut self, pct: f64) -> Self {
        self.set_ramp_up_pct(pct);
        self
    }

    pub fn effective_weight(&self) -> f64 {
        effective_weight(self)
    }
}

/// Selection mass of a backend after circuit and ramp-up discounts.
///
/// Never negative. Open circuits always yield zero,
/// half-open circuits ignore ramp-up and only keep a trickle.
pub fn effective_weight(input: &RoutingInput) -> f64 {
    let weight = input.weight.min(MAX_WEIGHT) as f64;
    match input.circuit_state {
        CircuitState::Open => 0.,
        CircuitState::HalfOpen => weight * HALF_OPEN_TRICKLE_FACTOR,
        CircuitState::Closed => weight * (input.ramp_up_pct.clamp(0., 100.) / 100.),
    }
}

/// Cumulative weight table used for weighted random selection.
///
/// Keys are ordered ascending, which makes the walk (and thus
/// the outcome for a draw exactly on a boundary) deterministic.
/// Backends with an effective weight of zero are left out entirely.
#[derive(Debug, Clone)]
pub struct WeightTable<K> {
    entries: Vec<(K, f64)>,
    total: f64,
}

impl<K: Ord> WeightTable<K> {
    pub fn new(backends: impl IntoIterator<Item = (K, RoutingInput)>) -> Self {
        let mut backends: Vec<_> = backends.into_iter().collect();
        backends.sort_by(|(a, _), (b, _)| a.cmp(b));

        let mut total = 0.;
        let entries = backends
            .into_iter()
            .filter_map(|(key, input)| {
                let weight = input.effective_weight();
                if weight <= 0. {
                    return None;
                }
                total += weight;
                Some((key, total))
            })
            .collect();

        Self { entries, total }
    }
}

impl<K> WeightTable<K> {
    pub fn total_weight(&self) -> f64 {
        self.total
    }

    /// `true` if no backend is eligible,
    /// in which case no selection can ever be made.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pick the first backend whose cumulative weight is `>= r`.
    ///
    /// `r` is expected in `[0, total_weight)`; values at or above the total
    /// (e.g. float rounding) select the last eligible backend.
    pub fn pick(&self, r: f64) -> Option<&K> {
        self.entries
            .iter()
            .find(|(_, cumulative)| *cumulative >= r)
            .or_else(|| self.entries.last())
            .map(|(key, _)| key)
    }

    /// Draw `r = uniform(0, total)` and pick the matching backend.
    ///
    /// Returns `None` when no backend is eligible,
    /// callers must treat that as "no eligible backend" and not retry.
    pub fn select(&self, rng: &mut impl RngExt) -> Option<&K> {
        if self.entries.is_empty() || self.total <= 0. {
            return None;
        }
        let r = rng.random_range(0.0..self.total);
        self.pick(r)
    }
}
