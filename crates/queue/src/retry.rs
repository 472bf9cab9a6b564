//! Retry backoff policy.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Fraction of the deterministic delay added as random jitter, upper bound.
const JITTER_FRACTION: f64 = 0.1;

/// Exponential backoff with jitter.
///
/// `delay(attempt) = min(cap, base * 2^(attempt-1)) * (1 + jitter)` with
/// jitter drawn uniformly from `[0, 0.1]`. The jitter is deliberately
/// non-optional: synchronized retry storms are worse than slightly uneven
/// retry timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay before the second attempt.
    pub base: Duration,
    /// Upper bound on the deterministic part of the delay.
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(5),
            cap: Duration::from_secs(600),
        }
    }
}

impl RetryPolicy {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// Backoff delay after the given attempt (1-indexed) failed.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let jitter = rand::rng().random_range(0.0..=JITTER_FRACTION);
        self.delay_with_jitter(attempt, jitter)
    }

    /// Inclusive bounds on what [`delay_for_attempt`] can return.
    ///
    /// [`delay_for_attempt`]: RetryPolicy::delay_for_attempt
    pub fn delay_bounds(&self, attempt: u32) -> (Duration, Duration) {
        (
            self.delay_with_jitter(attempt, 0.0),
            self.delay_with_jitter(attempt, JITTER_FRACTION),
        )
    }

    fn delay_with_jitter(&self, attempt: u32, jitter: f64) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base.as_millis() as f64;
        let cap_ms = self.cap.as_millis() as f64;
        let exp = 2_f64.powi((attempt - 1).min(62) as i32);
        let delay_ms = (base_ms * exp).min(cap_ms) * (1.0 + jitter);

        Duration::from_millis(delay_ms as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy::new(Duration::from_secs(5), Duration::from_secs(600));

        for (attempt, expected_secs) in [(1, 5), (2, 10), (3, 20), (4, 40)] {
            let (lo, hi) = policy.delay_bounds(attempt);
            assert_eq!(lo, Duration::from_secs(expected_secs));
            assert_eq!(hi, Duration::from_millis(expected_secs * 1100));
        }
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy::new(Duration::from_secs(5), Duration::from_secs(600));

        let (lo, hi) = policy.delay_bounds(30);
        assert_eq!(lo, Duration::from_secs(600));
        assert_eq!(hi, Duration::from_secs(660));
    }

    #[test]
    fn sampled_delay_stays_within_bounds() {
        let policy = RetryPolicy::default();

        for attempt in 1..=6 {
            let (lo, hi) = policy.delay_bounds(attempt);
            for _ in 0..50 {
                let d = policy.delay_for_attempt(attempt);
                assert!(d >= lo && d <= hi, "attempt {attempt}: {d:?} outside [{lo:?}, {hi:?}]");
            }
        }
    }

    #[test]
    fn attempt_zero_has_no_delay() {
        assert_eq!(RetryPolicy::default().delay_for_attempt(0), Duration::ZERO);
    }

    #[test]
    fn huge_attempt_counts_do_not_overflow() {
        let policy = RetryPolicy::default();
        let (lo, _) = policy.delay_bounds(u32::MAX);
        assert_eq!(lo, policy.cap);
    }
}
