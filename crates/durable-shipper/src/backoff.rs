//! Exponential backoff between delivery attempts.

use std::time::Duration;

/// Smallest delay used once a failure has been seen.
pub const MINIMUM_BACKOFF: Duration = Duration::from_secs(5);

/// Upper bound on the delay between attempts.
pub const MAXIMUM_BACKOFF: Duration = Duration::from_secs(10 * 60);

/// Tracks consecutive failures and derives the next timer interval.
///
/// | Failures | Interval (period = 2s) |
/// |----------|------------------------|
/// | 0        | 2s                     |
/// | 1        | 10s                    |
/// | 2        | 20s                    |
/// | 3        | 40s                    |
/// | 7+       | 600s (capped)          |
#[derive(Debug, Clone)]
pub struct BackoffSchedule {
    period: Duration,
    failures: u32,
}

impl BackoffSchedule {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            failures: 0,
        }
    }

    /// Base polling period.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Consecutive failures since the last success.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn mark_success(&mut self) {
        self.failures = 0;
    }

    pub fn mark_failure(&mut self) {
        self.failures = self.failures.saturating_add(1);
    }

    /// Delay before the next tick.
    ///
    /// `min(max(period, 5s) * 2^f, max(period, 10min))`, never below the
    /// period, and exactly the period when there are no failures.
    pub fn next_interval(&self) -> Duration {
        if self.failures == 0 {
            return self.period;
        }

        let base_ms = self.period.max(MINIMUM_BACKOFF).as_millis() as u64;
        let max_ms = self.period.max(MAXIMUM_BACKOFF).as_millis() as u64;
        let multiplier = 1u64.checked_shl(self.failures).unwrap_or(u64::MAX);
        let delay_ms = base_ms.saturating_mul(multiplier).min(max_ms);

        Duration::from_millis(delay_ms).max(self.period)
    }
}
