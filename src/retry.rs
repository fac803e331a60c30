//! Rate-limit retry policy.

use std::time::Duration;

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Delay before the first retry; doubled for every subsequent one.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);

/// Upper bound on any single backoff delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(8);

/// How the API client reacts to `429 Too Many Requests`.
///
/// A policy is built once from provider configuration and shared read-only by
/// every request issued through that provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// When false, requests are sent exactly once.
    pub enabled: bool,
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Delay for attempt 0.
    pub base_delay: Duration,
    /// Cap applied to every computed delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with the default delays.
    pub fn new(enabled: bool, max_retries: u32) -> Self {
        Self {
            enabled,
            max_retries,
            ..Default::default()
        }
    }

    /// A policy that never retries.
    pub fn disabled() -> Self {
        Self::new(false, 0)
    }

    /// Set the delay used for the first retry.
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Set the cap on a single delay.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Delay before retrying after the zero-based `attempt` was rate limited.
    ///
    /// `base_delay * 2^attempt`, saturating, capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Upper bound on the number of requests a single call can make.
    pub fn max_attempts(&self) -> u32 {
        if self.enabled {
            self.max_retries.saturating_add(1)
        } else {
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert!(policy.enabled);
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.max_attempts(), 4);
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_millis(500));
        assert_eq!(policy.backoff(1), Duration::from_millis(1000));
        assert_eq!(policy.backoff(2), Duration::from_millis(2000));
        assert_eq!(policy.backoff(3), Duration::from_millis(4000));
    }

    #[test]
    fn test_backoff_is_capped_and_monotonic() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(4), DEFAULT_MAX_DELAY);
        assert_eq!(policy.backoff(31), DEFAULT_MAX_DELAY);
        assert_eq!(policy.backoff(u32::MAX), DEFAULT_MAX_DELAY);

        let mut previous = Duration::ZERO;
        for attempt in 0..64 {
            let delay = policy.backoff(attempt);
            assert!(delay >= previous, "backoff shrank at attempt {attempt}");
            previous = delay;
        }
    }

    #[test]
    fn test_uncapped_backoff_saturates() {
        let policy = RetryPolicy::default().with_max_delay(Duration::MAX);
        assert_eq!(policy.backoff(10), Duration::from_millis(500 * 1024));
        assert!(policy.backoff(40) >= policy.backoff(31));
    }

    #[test]
    fn test_disabled_policy() {
        let policy = RetryPolicy::disabled();
        assert!(!policy.enabled);
        assert_eq!(policy.max_attempts(), 1);

        let policy = RetryPolicy::new(false, 5);
        assert_eq!(policy.max_attempts(), 1);
    }
}
