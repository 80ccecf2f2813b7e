//! Retry policy: transient/fatal classification and jittered exponential backoff.
//!
//! The policy is pure configuration. `backoff` and `should_retry` never touch
//! I/O; `execute`/`execute_with` only sleep between attempts.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use tracklane_core::TaskError;

use crate::error::ConfigError;

/// Retry policy configuration.
///
/// A task is attempted at most `max_retries + 1` times.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = no retries).
    pub max_retries: u32,
    /// Delay before the first retry, and the floor for every delay.
    pub base_delay: Duration,
    /// Maximum delay cap.
    pub max_delay: Duration,
    /// Growth factor per attempt (>= 1.0).
    pub multiplier: f64,
    /// Symmetric jitter fraction (0.0-1.0).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Create a policy with fixed delays.
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
            jitter: 0.0,
        }
    }

    /// Create a policy with exponential backoff (doubling, 10% jitter).
    pub fn exponential(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            multiplier: 2.0,
            jitter: 0.1,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_delay > self.max_delay {
            return Err(ConfigError::new("base_delay", "must not exceed max_delay"));
        }
        if !(self.multiplier.is_finite() && self.multiplier >= 1.0) {
            return Err(ConfigError::new("multiplier", "must be a finite number >= 1.0"));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigError::new("jitter", "must be within 0.0..=1.0"));
        }
        Ok(())
    }

    /// Total attempts allowed, first attempt included.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Un-jittered delay before retry number `attempt` (0-indexed):
    /// `min(max_delay, base_delay * multiplier^attempt)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_nanos() as f64;
        let max = self.max_delay.as_nanos() as f64;
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        // powi overflows to +inf for large attempts; min() then yields max.
        let delay = (base * self.multiplier.powi(exp)).min(max);
        Duration::from_nanos(delay.max(0.0) as u64)
    }

    /// Jittered delay before retry number `attempt`, clamped to
    /// `[base_delay, max_delay]`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.backoff(attempt).as_nanos() as f64;
        let jittered = if self.jitter > 0.0 {
            let spread: f64 = rand::rng().random_range(-1.0..=1.0);
            delay * (1.0 + self.jitter * spread)
        } else {
            delay
        };
        let clamped = jittered
            .max(self.base_delay.as_nanos() as f64)
            .min(self.max_delay.as_nanos() as f64);
        Duration::from_nanos(clamped as u64)
    }

    /// Whether a failure of attempt `attempt` (0-indexed) may be retried.
    pub fn should_retry(&self, error: &TaskError, attempt: u32) -> bool {
        error.is_transient() && attempt < self.max_retries
    }

    /// Run `f` until it succeeds, fails fatally, or the budget is spent.
    ///
    /// Fatal errors propagate unchanged without consuming a retry; a spent
    /// budget yields [`TaskError::RetriesExhausted`] wrapping the last failure.
    pub async fn execute<F, Fut, T>(&self, f: F) -> Result<T, TaskError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TaskError>>,
    {
        self.execute_with(f, TaskError::is_transient).await
    }

    /// Like [`execute`](Self::execute) with a caller-supplied retryability predicate.
    pub async fn execute_with<F, Fut, T, P>(&self, mut f: F, retryable: P) -> Result<T, TaskError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TaskError>>,
        P: Fn(&TaskError) -> bool,
    {
        let mut attempt = 0u32;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(err) if !retryable(&err) => return Err(err),
                Err(err) if attempt >= self.max_retries => {
                    return Err(TaskError::exhausted(attempt + 1, err));
                }
                Err(err) => {
                    let delay = self.delay_for(attempt);
                    debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying after transient failure");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use proptest::prelude::*;

    use super::*;

    fn no_jitter(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.0,
        }
    }

    #[test]
    fn exponential_backoff_calculates_correctly() {
        let policy = no_jitter(5);

        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(3), Duration::from_millis(800));
    }

    #[test]
    fn backoff_is_capped_at_max_delay() {
        let policy = no_jitter(5);
        assert_eq!(policy.backoff(20), Duration::from_secs(10));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(500));

        assert_eq!(policy.delay_for(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(500));
    }

    #[test]
    fn should_retry_respects_budget_and_classification() {
        let policy = no_jitter(3);
        let transient = TaskError::status(503, "busy");

        assert!(policy.should_retry(&transient, 0));
        assert!(policy.should_retry(&transient, 2));
        assert!(!policy.should_retry(&transient, 3));
        assert!(!policy.should_retry(&TaskError::status(404, "missing"), 0));
    }

    #[test]
    fn validate_rejects_nonsense() {
        assert!(RetryPolicy::default().validate().is_ok());
        assert!(RetryPolicy::default().with_jitter(1.5).validate().is_err());
        assert!(RetryPolicy { multiplier: 0.5, ..Default::default() }.validate().is_err());
        assert!(
            RetryPolicy {
                base_delay: Duration::from_secs(60),
                max_delay: Duration::from_secs(1),
                ..Default::default()
            }
            .validate()
            .is_err()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn execute_returns_first_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result = no_jitter(3)
            .execute(|| {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(TaskError::Timeout)
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<(), _> = no_jitter(3)
            .execute(|| {
                c.fetch_add(1, Ordering::SeqCst);
                async { Err(TaskError::status(400, "bad request")) }
            })
            .await;

        assert_eq!(result, Err(TaskError::status(400, "bad request")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_after_max_retries_plus_one_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<(), _> = no_jitter(2)
            .execute(|| {
                c.fetch_add(1, Ordering::SeqCst);
                async { Err(TaskError::status(502, "bad gateway")) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            result,
            Err(TaskError::exhausted(3, TaskError::status(502, "bad gateway")))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn custom_predicate_overrides_classification() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<(), _> = no_jitter(4)
            .execute_with(
                || {
                    c.fetch_add(1, Ordering::SeqCst);
                    async { Err(TaskError::status(409, "conflict")) }
                },
                |e| e.status_code() == Some(409),
            )
            .await;

        assert!(matches!(result, Err(TaskError::RetriesExhausted { attempts: 5, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: un-jittered backoff never decreases and never exceeds the cap.
        #[test]
        fn backoff_is_monotonic_and_capped(
            base_ms in 1u64..5_000,
            extra_ms in 0u64..120_000,
            multiplier in 1.0f64..4.0,
            attempt in 0u32..64,
        ) {
            let policy = RetryPolicy {
                max_retries: 10,
                base_delay: Duration::from_millis(base_ms),
                max_delay: Duration::from_millis(base_ms + extra_ms),
                multiplier,
                jitter: 0.0,
            };

            let current = policy.backoff(attempt);
            let next = policy.backoff(attempt + 1);
            prop_assert!(next >= current);
            prop_assert!(next <= policy.max_delay);
        }

        /// Property: jittered delays stay within [base_delay, max_delay].
        #[test]
        fn jittered_delay_stays_in_bounds(
            base_ms in 1u64..1_000,
            extra_ms in 0u64..10_000,
            jitter in 0.0f64..=1.0,
            attempt in 0u32..32,
        ) {
            let policy = RetryPolicy {
                max_retries: 10,
                base_delay: Duration::from_millis(base_ms),
                max_delay: Duration::from_millis(base_ms + extra_ms),
                multiplier: 2.0,
                jitter,
            };

            let delay = policy.delay_for(attempt);
            prop_assert!(delay >= policy.base_delay);
            prop_assert!(delay <= policy.max_delay);
        }
    }
}
