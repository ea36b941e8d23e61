//! Reconnect backoff policy

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default number of automatic reconnect attempts
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
/// Default delay before the first reconnect attempt
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Bounded exponential backoff for stream reconnects
///
/// The n-th attempt waits `base_delay * 2^(n-1)`. There is no jitter and no
/// upper clamp: the attempt cap bounds the growth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Maximum number of automatic reconnect attempts
    pub max_attempts: u32,
    /// Delay before the first reconnect attempt, in milliseconds
    pub base_delay_ms: u64,
}

impl ReconnectPolicy {
    /// Delay before the base attempt
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Computes the delay to apply before the given 1-based attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay().saturating_mul(1u32 << exponent)
    }

    /// Whether another automatic attempt is allowed after `attempts_made`
    pub fn allows(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY.as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1, 1000)]
    #[case(2, 2000)]
    #[case(3, 4000)]
    #[case(4, 8000)]
    #[case(5, 16000)]
    fn test_default_delays_double(#[case] attempt: u32, #[case] millis: u64) {
        let policy = ReconnectPolicy::default();
        assert_eq!(
            policy.delay_for_attempt(attempt),
            Duration::from_millis(millis)
        );
    }

    #[test]
    fn test_budget() {
        let policy = ReconnectPolicy::default();
        assert!(policy.allows(0));
        assert!(policy.allows(4));
        assert!(!policy.allows(5));
        assert!(!policy.allows(u32::MAX));
    }

    #[test]
    fn test_large_attempts_saturate() {
        let policy = ReconnectPolicy {
            max_attempts: 100,
            base_delay_ms: 1000,
        };
        assert!(policy.delay_for_attempt(80) >= policy.delay_for_attempt(31));
    }
}
