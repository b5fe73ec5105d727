//! Reconnect pacing for a connection that was lost after it had been accepted.
//!
//! Delays grow geometrically and are capped:
//! ```text
//! delay[n] = min(initial * multiplier^(n-1), max)
//! ```
//! Once the schedule has saturated at `max` (or an explicit attempt limit is
//! reached) `next_sleep` returns `BackoffError::Exhausted` and the kernel gives up.

use std::time::Duration;

use thiserror::Error;

use super::config::Config;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BackoffError {
    #[error("Reconnect attempts exhausted after {0} tries")]
    Exhausted(u32),
}

#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    current: Duration,
    max: Duration,
    multiplier: f64,
    attempt: u32,
    limit: u32,
}

impl Backoff {
    /// The attempt limit defaults to the number of steps needed to reach `max`.
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            initial,
            current: initial,
            max,
            multiplier,
            attempt: 0,
            limit: Self::steps_to_saturate(initial, max, multiplier),
        }
    }

    /// Builds the schedule from the `reconnect_*` settings of a transport config.
    ///
    /// `max_reconnect_attempts = 0` keeps the computed limit.
    pub fn from_config(config: &Config) -> Self {
        let mut backoff = Self::new(
            Duration::from_secs(config.reconnect_delay),
            Duration::from_secs(config.max_reconnect_delay),
            config.reconnect_multiplier,
        );
        if config.max_reconnect_attempts > 0 {
            backoff.limit = config.max_reconnect_attempts;
        }
        backoff
    }

    fn steps_to_saturate(initial: Duration, max: Duration, multiplier: f64) -> u32 {
        if initial.is_zero() || initial >= max || multiplier <= 1.0 {
            return 1;
        }
        let ratio = max.as_secs_f64() / initial.as_secs_f64();
        ratio.log(multiplier).floor() as u32 + 1
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    /// Returns the delay to wait before the next attempt and advances the schedule.
    pub fn next_sleep(&mut self) -> Result<Duration, BackoffError> {
        self.attempt += 1;
        if self.attempt > self.limit {
            return Err(BackoffError::Exhausted(self.limit));
        }

        let sleep = self.current;
        self.current = Duration::from_secs_f64(self.current.as_secs_f64() * self.multiplier).min(self.max);
        Ok(sleep)
    }

    /// Called once the broker accepted us again.
    pub fn reset(&mut self) {
        self.current = self.initial;
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60), 2.0)
    }
}
