//! Retry decisions for transient failures.
//!
//! The policy is a pure function of the error kind and the attempt count;
//! the scheduler applies it to whole-job reruns and the batch processor
//! applies it to per-file store attempts.

use std::time::Duration;

/// Classifies whether retrying an error can possibly succeed.
pub trait Retryable {
    /// True when the error is transient.
    fn is_retryable(&self) -> bool;
}

/// Outcome of consulting the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after waiting for the given backoff delay.
    Retry(Duration),
    /// Stop retrying and surface the error.
    GiveUp,
}

/// Bounded exponential-backoff retry policy.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts allowed, counting the first run.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Cap applied to the exponential backoff.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Build a policy from explicit knobs.
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Decide whether attempt number `attempts` (1-based, just finished)
    /// should be followed by another try.
    pub fn decide<E: Retryable>(&self, error: &E, attempts: u32) -> RetryDecision {
        if !error.is_retryable() || attempts >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry(self.backoff(attempts))
    }

    /// Backoff for the retry following attempt `attempts`: `base * 2^(attempts-1)`,
    /// capped at `max_delay`.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1 << exponent);
        delay.min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}
