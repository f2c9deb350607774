//! Deterministic exponential backoff for batch redelivery.
//!
//! The schedule is closed-form: attempt `n` (1-based) waits
//! `initial * multiplier^(n-1)`, capped at the configured maximum. No
//! jitter; redelivery order within a partition must stay deterministic
//! because batch `k+1` never dispatches before batch `k` resolves.

use std::time::Duration;

use crate::config::StreamConfig;

/// Retry schedule for one producer.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    initial: Duration,
    max_interval: Duration,
    multiplier: f64,
    max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(
        initial: Duration,
        max_interval: Duration,
        multiplier: f64,
        max_attempts: u32,
    ) -> Self {
        Self {
            initial,
            max_interval,
            multiplier,
            max_attempts,
        }
    }

    pub fn from_config(config: &StreamConfig) -> Self {
        Self::new(
            config.backoff_initial_interval(),
            config.backoff_max_interval(),
            config.backoff_multiplier,
            config.max_attempts,
        )
    }

    /// Total deliveries allowed per batch, the first included.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether another delivery is allowed after `attempts` have been made.
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Backoff before retry attempt `attempt` (1-based: the first retry is
    /// attempt 1).
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let delay = self.initial.as_millis() as f64 * factor;
        let capped = delay.min(self.max_interval.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// The full backoff schedule, one delay per permitted retry.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (1..self.max_attempts).map(|attempt| self.next_delay(attempt))
    }
}
