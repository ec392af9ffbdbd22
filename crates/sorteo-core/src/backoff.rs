//! Retry backoff schedule.
//!
//! A pure delay function plus a small schedule type. Callers own the timer
//! and its cancellation handle; nothing here sleeps.

use std::time::Duration;

/// Upper bound on any single delay, regardless of attempt number.
const MAX_DELAY: Duration = Duration::from_secs(30);

/// Delay before retry number `attempt` (zero-based): `base * 2^attempt`,
/// clamped to thirty seconds.
pub fn delay_for_attempt(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX))
        .min(MAX_DELAY)
}

/// Capped exponential backoff schedule.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    max_attempts: u32,
}

impl Backoff {
    /// Creates a schedule of `max_attempts` retries starting at `base`.
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        Self { base, max_attempts }
    }

    /// Delay before retry `attempt`, or `None` once the cap is reached.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        Some(delay_for_attempt(self.base, attempt))
    }

    /// Number of retries this schedule allows.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_double() {
        let base = Duration::from_millis(500);
        assert_eq!(delay_for_attempt(base, 0), Duration::from_millis(500));
        assert_eq!(delay_for_attempt(base, 1), Duration::from_millis(1000));
        assert_eq!(delay_for_attempt(base, 2), Duration::from_millis(2000));
    }

    #[test]
    fn test_delay_clamped() {
        let base = Duration::from_millis(500);
        assert_eq!(delay_for_attempt(base, 30), Duration::from_secs(30));
    }

    #[test]
    fn test_schedule_cap() {
        let backoff = Backoff::new(Duration::from_millis(100), 3);
        assert_eq!(backoff.delay(0), Some(Duration::from_millis(100)));
        assert_eq!(backoff.delay(2), Some(Duration::from_millis(400)));
        assert_eq!(backoff.delay(3), None);
    }
}
