//! Retry policy for transient store failures.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Backoff {
    /// Retry immediately.
    None,
    /// The same delay before every retry.
    Fixed { delay_ms: u64 },
    /// `base_ms * 2^(retry-1)`, capped at `max_ms`.
    Exponential { base_ms: u64, max_ms: u64 },
}

impl Backoff {
    /// Delay before retry number `retry` (1 = first retry).
    pub fn delay(&self, retry: u32) -> Duration {
        match *self {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            Backoff::Exponential { base_ms, max_ms } => {
                let factor = 1u64.checked_shl(retry.saturating_sub(1)).unwrap_or(u64::MAX);
                Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::Fixed { delay_ms: 2_000 },
        }
    }
}

impl RetryPolicy {
    /// No delay between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::None,
        }
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or the
    /// attempts run out. Returns the last result and the attempts made.
    pub fn run<T, E, F, P>(&self, label: &str, is_transient: P, mut op: F) -> (Result<T, E>, u32)
    where
        E: std::fmt::Display,
        F: FnMut(u32) -> Result<T, E>,
        P: Fn(&E) -> bool,
    {
        let max = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return (Ok(value), attempt),
                Err(e) if attempt < max && is_transient(&e) => {
                    let delay = self.backoff.delay(attempt);
                    warn!(op = label, attempt, max_attempts = max, error = %e, ?delay, "transient failure, retrying");
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                    attempt += 1;
                }
                Err(e) => return (Err(e), attempt),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    enum TestError {
        Busy,
        Fatal,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{self:?}")
        }
    }

    fn transient(e: &TestError) -> bool {
        matches!(e, TestError::Busy)
    }

    #[test]
    fn default_is_three_attempts_with_fixed_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.backoff.delay(1), Duration::from_secs(2));
        assert_eq!(policy.backoff.delay(2), policy.backoff.delay(1));
    }

    #[test]
    fn exponential_backoff_is_opt_in() {
        let policy: RetryPolicy =
            toml::from_str("backoff = { type = \"exponential\", base_ms = 200, max_ms = 5000 }").unwrap();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.backoff.delay(3), Duration::from_millis(800));
    }

    #[test]
    fn succeeds_after_transient_failures() {
        let policy = RetryPolicy::immediate(3);
        let (result, attempts) = policy.run("op", transient, |attempt| {
            if attempt < 3 {
                Err(TestError::Busy)
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(result.unwrap(), 3);
        assert_eq!(attempts, 3);
    }

    #[test]
    fn exhaustion_returns_last_error() {
        let policy = RetryPolicy::immediate(2);
        let mut calls = 0;
        let (result, attempts) = policy.run("op", transient, |_| -> Result<(), _> {
            calls += 1;
            Err(TestError::Busy)
        });
        assert!(matches!(result, Err(TestError::Busy)));
        assert_eq!((attempts, calls), (2, 2));
    }

    #[test]
    fn fatal_errors_are_not_retried() {
        let policy = RetryPolicy::immediate(5);
        let (result, attempts) = policy.run("op", transient, |_| -> Result<(), _> { Err(TestError::Fatal) });
        assert!(matches!(result, Err(TestError::Fatal)));
        assert_eq!(attempts, 1);
    }

    #[test]
    fn backoff_delays() {
        assert_eq!(Backoff::None.delay(3), Duration::ZERO);
        assert_eq!(Backoff::Fixed { delay_ms: 50 }.delay(7), Duration::from_millis(50));
        let exp = Backoff::Exponential { base_ms: 100, max_ms: 1_000 };
        assert_eq!(exp.delay(1), Duration::from_millis(100));
        assert_eq!(exp.delay(2), Duration::from_millis(200));
        assert_eq!(exp.delay(3), Duration::from_millis(400));
        assert_eq!(exp.delay(10), Duration::from_millis(1_000));
        assert_eq!(exp.delay(200), Duration::from_millis(1_000));
    }
}
