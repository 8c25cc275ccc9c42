use std::time::Duration;

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry budget exhausted; the job becomes failed.
    NoRetry,
    /// Make the job eligible again after the given delay.
    RetryAfter(Duration),
}

/// Exponential backoff with a bounded number of retries.
///
/// The delay after a failure observed with `attempts = k` (before the
/// increment) is `base_delay * 2^k`. Once `attempts >= max_retries` the next
/// transient failure is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Base delay for backoff.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Whether a failure with `attempts` already recorded is terminal.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_retries
    }

    /// Backoff delay for a failure observed with `attempts` recorded so far.
    /// Saturates instead of overflowing for absurd attempt counts.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let factor = 1u32.checked_shl(attempts).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Decide what a transient failure does to a job with `attempts` recorded.
    pub fn decide(&self, attempts: u32) -> RetryDecision {
        if self.is_exhausted(attempts) {
            RetryDecision::NoRetry
        } else {
            RetryDecision::RetryAfter(self.backoff(attempts))
        }
    }
}
