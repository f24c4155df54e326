//! Exponential backoff for idempotent operations.

use std::time::Duration;

use kanban_core::config::RetrySettings;

/// Retry behaviour for transient failures.
///
/// `max_attempts` counts the first attempt, so `1` disables retrying.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(s: &RetrySettings) -> Self {
        RetryPolicy {
            max_attempts: s.max_attempts.max(1),
            initial_delay: Duration::from_millis(s.initial_delay_ms),
            max_delay: Duration::from_millis(s.max_delay_ms),
            factor: s.factor,
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retry.
    #[must_use]
    pub fn none() -> Self {
        RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        }
    }

    /// Near-instant retries, for tests.
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            factor: 2.0,
        }
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            delay: self.initial_delay,
            max_delay: self.max_delay,
            factor: self.factor.max(1.0),
        }
    }
}

/// Successive delays of one retry sequence.
#[derive(Debug, Clone)]
pub struct Backoff {
    delay: Duration,
    max_delay: Duration,
    factor: f64,
}

impl Backoff {
    pub fn next_delay(&mut self) -> Duration {
        let current = self.delay.min(self.max_delay);
        self.delay = current.mul_f64(self.factor).min(self.max_delay);
        current
    }
}
