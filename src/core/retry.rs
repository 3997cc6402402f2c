//! Backoff schedule for `CircuitBreakers::call_with_retry`.
//!
//! Attempt `n` waits `initial_delay_ms * backoff_multiplier^(n-1)`, capped at
//! `max_delay_ms`. The breaker stops retrying earlier if it opens.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How often and how patiently a breaker-guarded call is retried
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total calls made, the first one included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Wait after the first failed call
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Upper bound on any single wait
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Growth factor applied to the wait per failed call
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> u64 {
    1000
}

fn default_max_delay() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// Call once and never retry
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Wait before the call that follows failed call number `attempt`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let millis = (self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent))
            .min(self.max_delay_ms as f64);
        Duration::from_millis(millis as u64)
    }

    /// False once `attempt` calls have used up the budget
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
