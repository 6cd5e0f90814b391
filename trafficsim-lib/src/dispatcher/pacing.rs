use std::time::Duration;

use serde::Serialize;

/// Shortest tick the dispatcher schedules, shorter intervals are raised to it.
pub const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);

/// How a target rate is spread over fixed ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickPlan {
    pub rps: u32,
    pub requests_per_tick: u32,
    #[serde(rename = "tickIntervalMs", serialize_with = "serialize_millis")]
    pub tick_interval: Duration,
}

impl TickPlan {
    /// Quantize `rps` into whole requests per tick.
    ///
    /// At least one request is fired per tick, so the lowest
    /// rate that can be achieved is one request per tick interval.
    pub fn new(rps: u32, tick_interval: Duration) -> Self {
        let tick_interval = tick_interval.max(MIN_TICK_INTERVAL);
        let ticks_per_sec = ticks_per_second(tick_interval);
        let requests_per_tick = (rps as f64 / ticks_per_sec).round().max(1.) as u32;
        Self {
            rps,
            requests_per_tick,
            tick_interval,
        }
    }

    /// Rate this plan produces in practice, after quantization.
    pub fn effective_rps(&self) -> f64 {
        self.requests_per_tick as f64 * ticks_per_second(self.tick_interval)
    }
}

fn ticks_per_second(tick_interval: Duration) -> f64 {
    1. / tick_interval.as_secs_f64()
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}
