//! Reconnect delay computation.
//!
//! `delay = min(base * 2^attempt, max)`, with `attempt` counted from zero.
//! The attempt counter itself lives in the connection manager; this module
//! holds no state beyond its configuration.

use rand::Rng;
use std::time::Duration;

pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    base_delay: Duration,
    max_delay: Duration,
    jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            jitter: false,
        }
    }
}

impl BackoffPolicy {
    /// A ceiling below the base is raised to the base.
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay: max_delay.max(base_delay),
            jitter: false,
        }
    }

    /// Equal jitter: half of the computed delay is kept, the other half is
    /// drawn uniformly. Never exceeds the deterministic delay.
    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn jitter(&self) -> bool {
        self.jitter
    }

    /// Deterministic capped doubling.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let max_ms = self.max_delay.as_millis() as u64;
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
    }

    /// The delay actually used for scheduling: `delay_for_attempt`, jittered
    /// when enabled.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        if !self.jitter {
            return delay;
        }

        let delay_ms = delay.as_millis() as u64;
        let half = delay_ms / 2;
        let spread = rand::thread_rng().gen_range(0..=delay_ms - half);
        Duration::from_millis(half + spread)
    }
}

/// How long the manager keeps retrying after transport failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// Retry forever with bounded delay.
    #[default]
    Unlimited,
    /// Give up (enter `Failed`) once this many reconnects were scheduled
    /// without an intervening successful open.
    MaxAttempts(u32),
}

impl RetryPolicy {
    /// `0` means unlimited.
    pub fn from_max_attempts(max_attempts: u32) -> Self {
        if max_attempts == 0 {
            RetryPolicy::Unlimited
        } else {
            RetryPolicy::MaxAttempts(max_attempts)
        }
    }

    pub fn allows(&self, attempts_made: u32) -> bool {
        match self {
            RetryPolicy::Unlimited => true,
            RetryPolicy::MaxAttempts(max) => attempts_made < *max,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sequence_is_capped_doubling() {
        let policy = BackoffPolicy::default();
        let delays: Vec<u64> = (0..7)
            .map(|attempt| policy.delay_for_attempt(attempt).as_millis() as u64)
            .collect();

        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000, 30000, 30000]);
    }

    #[test]
    fn test_huge_attempt_does_not_overflow() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for_attempt(63), Duration::from_millis(30_000));
        assert_eq!(policy.delay_for_attempt(64), Duration::from_millis(30_000));
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_millis(30_000));
    }

    #[test]
    fn test_custom_base_and_ceiling() {
        let policy = BackoffPolicy::new(Duration::from_millis(100), Duration::from_millis(1600));
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(1600));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(1600));
    }

    #[test]
    fn test_ceiling_below_base_is_raised() {
        let policy = BackoffPolicy::new(Duration::from_millis(500), Duration::from_millis(100));
        assert_eq!(policy.max_delay(), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(500));
    }

    #[test]
    fn test_next_delay_without_jitter_is_deterministic() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.next_delay(2), Duration::from_millis(4000));
    }

    #[test]
    fn test_jitter_stays_within_upper_half() {
        let policy = BackoffPolicy::default().with_jitter(true);
        for attempt in 0..10 {
            let ceiling = policy.delay_for_attempt(attempt);
            let delay = policy.next_delay(attempt);
            assert!(delay <= ceiling, "attempt {attempt}: {delay:?} > {ceiling:?}");
            assert!(delay >= ceiling / 2, "attempt {attempt}: {delay:?} < half");
        }
    }

    #[test]
    fn test_retry_policy() {
        assert!(RetryPolicy::Unlimited.allows(u32::MAX));
        assert_eq!(RetryPolicy::from_max_attempts(0), RetryPolicy::Unlimited);

        let bounded = RetryPolicy::from_max_attempts(3);
        assert!(bounded.allows(2));
        assert!(!bounded.allows(3));
    }
}
