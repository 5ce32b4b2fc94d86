//! Per-tick timing published by the scheduler.

use std::time::{Duration, Instant};

/// Timing of the scheduler tick currently running.
///
/// The scheduler stores this as a registry resource before it runs any system,
/// so systems read it with `registry.resource::<Time>()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Time {
    /// Wall time since the previous `update()`. Zero on the first tick.
    pub delta: Duration,
    /// Sum of all deltas so far.
    pub elapsed: Duration,
    /// Zero-based tick number.
    pub tick: u64,
}

impl Time {
    /// Delta in seconds, for integrating motion.
    pub fn delta_secs(&self) -> f32 {
        self.delta.as_secs_f32()
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }
}

/// Wall clock driving [`Time`].
#[derive(Debug, Default)]
pub(crate) struct Clock {
    last: Option<Instant>,
    elapsed: Duration,
    ticks: u64,
}

impl Clock {
    /// Advance to a new tick and return its timing.
    pub fn tick(&mut self) -> Time {
        let now = Instant::now();
        let delta = self.last.map_or(Duration::ZERO, |last| now - last);
        self.last = Some(now);
        self.elapsed += delta;
        let time = Time {
            delta,
            elapsed: self.elapsed,
            tick: self.ticks,
        };
        self.ticks += 1;
        time
    }

    /// Number of ticks started so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}
