use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Backoff policy used while waiting for a pod to show up.
///
/// The defaults tolerate pods that are still being scheduled right after a
/// rollout: 25 retries after the first attempt, starting at one second and
/// doubling up to a 30 second cap.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included.
    pub max_attempts: u32,
    /// Delay, in milliseconds, before the first retry.
    pub initial_delay_ms: u64,
    /// Cap on the delay between two attempts.
    pub max_delay_ms: u64,
    /// Exponential backoff multiplier applied to the delay after each attempt.
    pub backoff_factor: f32,
}

impl RetryConfig {
    /// Returns the delay to wait after the failed attempt number `attempt`
    /// (zero based) before the next one.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = f64::from(self.backoff_factor).powi(attempt.min(i32::MAX as u32) as i32);
        let delay_ms = (self.initial_delay_ms as f64 * factor).min(self.max_delay_ms as f64);

        Duration::from_millis(delay_ms as u64)
    }

    /// Returns the total time spent sleeping if every attempt fails.
    pub fn total_budget(&self) -> Duration {
        (0..self.max_attempts.saturating_sub(1))
            .map(|attempt| self.delay_after(attempt))
            .sum()
    }

    /// Validates the [`RetryConfig`].
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_attempts == 0 {
            return Err(ValidationError::MaxAttemptsZero);
        }

        if self.backoff_factor.is_nan() || self.backoff_factor < 1.0 {
            return Err(ValidationError::InvalidBackoffFactor(self.backoff_factor));
        }

        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 26,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
        }
    }
}
