//! Bounded exponential backoff for idempotent reads.

use std::time::Duration;

use rand::Rng;

/// Longest single delay between attempts.
const MAX_DELAY: Duration = Duration::from_secs(5);

/// Retry policy for reads. Mutations are never retried.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first (at least 1).
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled for each further attempt.
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Create a policy. `max_attempts` of 0 is treated as 1.
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    ///
    /// `base * 2^(attempt-1)` plus up to 50% random jitter, capped at
    /// [`MAX_DELAY`]. A server-provided `Retry-After` raises the floor.
    #[must_use]
    pub fn delay_after(&self, attempt: u32, retry_after: Option<u64>) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let backoff = self.base_delay.saturating_mul(1 << exponent);

        let jitter_ceiling = u64::try_from(backoff.as_millis() / 2).unwrap_or(u64::MAX);
        let jitter = if jitter_ceiling == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::rng().random_range(0..=jitter_ceiling))
        };

        let floor = retry_after.map_or(Duration::ZERO, Duration::from_secs);
        (backoff + jitter).max(floor).min(MAX_DELAY)
    }
}
