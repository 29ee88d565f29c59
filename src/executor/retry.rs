//! Retry policy: capped exponential backoff with jitter.

use std::time::Duration;
use tinyrand::{Rand, Seeded, StdRand};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total submissions allowed, the first one included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    /// 5 attempts, 500ms doubling up to 30s.
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Un-jittered delay after the given failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Backoff with "equal jitter": half fixed, half random.
    pub fn delay(&self, attempt: u32, rng: &mut StdRand) -> Duration {
        let backoff = self.backoff(attempt).as_millis() as u64;
        let half = backoff / 2;
        let jitter = if half == 0 { 0 } else { rng.next_u64() % (half + 1) };
        Duration::from_millis(half + jitter)
    }
}

/// Jitter source for one operation; `salt` keeps concurrent workers apart.
pub fn jitter_rng(salt: u64) -> StdRand {
    let nanos = chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_default() as u64;
    StdRand::seed(nanos ^ salt.rotate_left(32))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let p = policy();
        assert_eq!(p.backoff(1), Duration::from_millis(100));
        assert_eq!(p.backoff(2), Duration::from_millis(200));
        assert_eq!(p.backoff(3), Duration::from_millis(350));
        assert_eq!(p.backoff(40), Duration::from_millis(350));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let p = policy();
        let mut rng = StdRand::seed(42);
        for attempt in 1..=6 {
            let backoff = p.backoff(attempt);
            for _ in 0..50 {
                let d = p.delay(attempt, &mut rng);
                assert!(d >= backoff / 2 && d <= backoff, "{d:?} outside [{:?}, {backoff:?}]", backoff / 2);
            }
        }
    }

    #[test]
    fn test_should_retry_counts_first_attempt() {
        let p = policy();
        assert!(p.should_retry(1));
        assert!(p.should_retry(3));
        assert!(!p.should_retry(4));
    }
}
