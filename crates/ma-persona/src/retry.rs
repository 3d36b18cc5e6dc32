//! Retry/backoff envelope (spec §4.6 step 4).
//!
//! Pure arithmetic kept separate from the I/O-bound executor so the
//! schedule itself can be tested without a transport or LM client, in the
//! same vein as `csa-scheduler/src/failover.rs`'s pure decision functions.

use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RetrySchedule {
    pub base_timeout_ms: u64,
    pub backoff_increment_ms: u64,
    /// `None` means unlimited attempts (negative override, §4.6 step 4).
    pub max_retries: Option<u32>,
}

impl RetrySchedule {
    /// Timeout for the given 1-indexed attempt: base timeout plus
    /// `attempt * backoff_increment_ms`.
    pub fn timeout_for_attempt(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_timeout_ms + (attempt as u64) * self.backoff_increment_ms)
    }

    /// Whether another attempt may be made after `attempts_so_far` have
    /// already run.
    pub fn may_retry(&self, attempts_so_far: u32) -> bool {
        match self.max_retries {
            None => true,
            Some(max) => attempts_so_far < max,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_grows_linearly_with_attempt() {
        let schedule = RetrySchedule {
            base_timeout_ms: 30_000,
            backoff_increment_ms: 5_000,
            max_retries: Some(3),
        };
        assert_eq!(schedule.timeout_for_attempt(1), Duration::from_millis(35_000));
        assert_eq!(schedule.timeout_for_attempt(2), Duration::from_millis(40_000));
    }

    #[test]
    fn unlimited_retries_always_may_retry() {
        let schedule = RetrySchedule {
            base_timeout_ms: 1_000,
            backoff_increment_ms: 100,
            max_retries: None,
        };
        assert!(schedule.may_retry(1_000_000));
    }

    #[test]
    fn bounded_retries_stop_at_the_limit() {
        let schedule = RetrySchedule {
            base_timeout_ms: 1_000,
            backoff_increment_ms: 100,
            max_retries: Some(3),
        };
        assert!(schedule.may_retry(2));
        assert!(!schedule.may_retry(3));
    }
}
