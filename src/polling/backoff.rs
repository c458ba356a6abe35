//! Exponential backoff between status polls.
//!
//! The worker waits `min(max, seed * rate^tries)` before each re-poll:
//!
//! - Default: 200ms seed, 1.5x growth, 3s cap
//! - With the defaults the cap is reached after 7 polls (200ms * 1.5^7 ≈ 3.4s)
//!
//! The calculation is pure; the worker does the sleeping.

use std::time::Duration;

/// Default delay before the first re-poll.
const DEFAULT_SEED_MS: u64 = 200;

/// Default growth factor between consecutive delays.
const DEFAULT_RATE: f64 = 1.5;

/// Default ceiling for a single delay.
const DEFAULT_MAX_MS: u64 = 3000;

/// Delay factors for the poll loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    /// Delay when no polls have been made yet.
    pub seed: Duration,

    /// Multiplier applied once per poll already made.
    pub rate: f64,

    /// Cap for exponential growth.
    pub max: Duration,
}

impl BackoffConfig {
    /// Default delay factors for status polling.
    pub const DEFAULT: Self = Self {
        seed: Duration::from_millis(DEFAULT_SEED_MS),
        rate: DEFAULT_RATE,
        max: Duration::from_millis(DEFAULT_MAX_MS),
    };

    /// Creates a new backoff configuration.
    pub fn new(seed: Duration, rate: f64, max: Duration) -> Self {
        Self { seed, rate, max }
    }

    /// Computes the pause after `tries` polls.
    pub fn pause(&self, tries: u32) -> Duration {
        pause(self.seed, self.rate, self.max, tries)
    }

    /// Returns an iterator over the pauses for the first `count` polls.
    pub fn pauses(&self, count: u32) -> impl Iterator<Item = Duration> + '_ {
        (0..count).map(|tries| self.pause(tries))
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Computes `min(max, seed * rate^tries)`.
///
/// The result is never negative and never exceeds `max`. A growth that
/// overflows to infinity (or a NaN from a nonsensical rate) saturates to `max`.
pub fn pause(seed: Duration, rate: f64, max: Duration, tries: u32) -> Duration {
    let exponent = i32::try_from(tries).unwrap_or(i32::MAX);
    let raw_nanos = seed.as_nanos() as f64 * rate.powi(exponent);

    if raw_nanos.is_nan() || raw_nanos >= max.as_nanos() as f64 {
        return max;
    }
    if raw_nanos <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_nanos(raw_nanos.round() as u64)
}
