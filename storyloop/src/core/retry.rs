//! Retry bounds and backoff schedule for provider invocations.

use std::time::Duration;

/// Maximum retry count plus an ordered backoff schedule.
///
/// `max_retries = 0` still means one attempt. The configuration layer ensures
/// `delays` is non-empty whenever `max_retries > 0`; it is not re-checked here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: i64,
    pub delays: Vec<Duration>,
}

impl RetryPolicy {
    pub fn new(max_retries: i64, delays: Vec<Duration>) -> Self {
        Self {
            max_retries,
            delays,
        }
    }

    /// Total number of invocation attempts, never less than one.
    pub fn total_attempts(&self) -> u64 {
        let total = self.max_retries.saturating_add(1);
        u64::try_from(total).unwrap_or(0).max(1)
    }

    /// Delay to wait after the failed attempt at `attempt` (0-indexed).
    ///
    /// Indices past the schedule repeat its last entry; an empty schedule
    /// means retrying immediately.
    pub fn delay_for(&self, attempt: u64) -> Duration {
        let Some(last) = self.delays.last() else {
            return Duration::ZERO;
        };
        usize::try_from(attempt)
            .ok()
            .and_then(|index| self.delays.get(index))
            .unwrap_or(last)
            .to_owned()
    }
}
