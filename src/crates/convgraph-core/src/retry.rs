//! Retry policy for failing nodes
//!
//! A node that returns `Err` is re-invoked with exponential backoff until it
//! succeeds or `max_attempts` is used up. Suspensions are never retried: they
//! are a normal outcome, not a failure.
//!
//! ```text
//! attempt 1 fails -> wait initial_interval
//! attempt 2 fails -> wait initial_interval * backoff_factor
//! attempt 3 fails -> wait initial_interval * backoff_factor^2   (capped at max_interval)
//! ...
//! ```
//!
//! Nodes without a policy of their own fall back to the engine default, and
//! without either they get a single attempt.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff configuration, intervals in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: usize,

    pub initial_interval: f64,

    pub backoff_factor: f64,

    pub max_interval: f64,

    /// Scale each delay by a random factor in `[0.5, 1.5]`
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            initial_interval: 0.5,
            backoff_factor: 2.0,
            max_interval: 128.0,
            jitter: true,
        }
    }

    /// Policy that never retries
    pub fn single_attempt() -> Self {
        Self::new(1)
    }

    pub fn with_initial_interval(mut self, seconds: f64) -> Self {
        self.initial_interval = seconds;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_max_interval(mut self, seconds: f64) -> Self {
        self.max_interval = seconds;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before the next attempt, given how many attempts already failed
    pub fn delay_after(&self, failed_attempts: usize) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(i32::MAX as usize) as i32;
        let base = self.initial_interval * self.backoff_factor.powi(exponent);
        let capped = base.min(self.max_interval).max(0.0);

        let delay = if self.jitter {
            capped * rand::thread_rng().gen_range(0.5..=1.5)
        } else {
            capped
        };

        // saturate instead of panicking on delays no Duration can hold
        Duration::try_from_secs_f64(delay).unwrap_or(Duration::MAX)
    }

    /// Whether another attempt is allowed after `attempts` tries
    pub fn should_retry(&self, attempts: usize) -> bool {
        attempts < self.max_attempts
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".to_string());
        }
        for (name, value) in [
            ("initial_interval", self.initial_interval),
            ("backoff_factor", self.backoff_factor),
            ("max_interval", self.max_interval),
        ] {
            if !value.is_finite() {
                return Err(format!("{name} must be a finite number, got {value}"));
            }
        }
        if self.initial_interval < 0.0 || self.max_interval < 0.0 {
            return Err("retry intervals must not be negative".to_string());
        }
        if self.backoff_factor < 1.0 {
            return Err(format!(
                "backoff_factor must be at least 1.0, got {}",
                self.backoff_factor
            ));
        }
        Ok(())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}
