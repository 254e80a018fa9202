//! Bounded retry with jittered exponential backoff.

use crate::config::RetryConfig;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Errors from a retried operation.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// Every attempt failed. `errors` holds each attempt's error in order;
    /// the last entry is the immediate cause.
    #[error("retries exhausted after {attempts} attempts")]
    Exhausted { attempts: u32, errors: Vec<E> },

    /// The retryable filter classified this error as non-retryable; it is
    /// surfaced immediately without further attempts.
    #[error("non-retryable error: {0}")]
    NonRetryable(E),

    /// Cancellation was observed during an attempt or a backoff delay.
    /// Never counted as a further retry.
    #[error("retry cancelled")]
    Cancelled,
}

/// Retry policy: up to `max_retries + 1` total attempts with exponential
/// backoff between them.
///
/// The delay before attempt `n` (n >= 2) is
/// `min(initial_delay * backoff_multiplier^(n-2), max_delay)`, widened by a
/// bounded multiplicative jitter so concurrent callers do not retry in
/// lockstep.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Retry `operation` treating every error as retryable.
    pub async fn execute<T, E, F, Fut>(
        &self,
        operation: F,
        label: &str,
        cancellation: &CancellationToken,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_filtered(operation, |_| true, label, cancellation)
            .await
    }

    /// Retry `operation`, rethrowing immediately when `is_retryable`
    /// classifies an error as non-retryable.
    ///
    /// The operation receives the 1-based attempt index.
    pub async fn execute_filtered<T, E, F, Fut, P>(
        &self,
        mut operation: F,
        is_retryable: P,
        label: &str,
        cancellation: &CancellationToken,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let total_attempts = self.config.max_retries + 1;
        let mut errors = Vec::new();

        for attempt in 1..=total_attempts {
            if cancellation.is_cancelled() {
                return Err(RetryError::Cancelled);
            }

            let result = tokio::select! {
                result = operation(attempt) => result,
                _ = cancellation.cancelled() => return Err(RetryError::Cancelled),
            };

            match result {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation = label, attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if !is_retryable(&err) => {
                    warn!(operation = label, attempt, "non-retryable error, giving up");
                    return Err(RetryError::NonRetryable(err));
                }
                Err(err) => {
                    errors.push(err);
                    if attempt < total_attempts {
                        let delay = self.delay_for_attempt(attempt + 1);
                        debug!(
                            operation = label,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "attempt failed, backing off"
                        );
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = cancellation.cancelled() => return Err(RetryError::Cancelled),
                        }
                    }
                }
            }
        }

        warn!(
            operation = label,
            attempts = total_attempts,
            "retries exhausted"
        );
        Err(RetryError::Exhausted {
            attempts: total_attempts,
            errors,
        })
    }

    /// Backoff delay before the given 2-based attempt, jitter included.
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(2) as i32;
        let delay = self
            .config
            .initial_delay()
            .mul_f64(self.config.backoff_multiplier.powi(exponent));

        let jittered = if self.config.jitter_factor > 0.0 {
            let jitter = fastrand::f64() * self.config.jitter_factor;
            delay.mul_f64(1.0 + jitter)
        } else {
            delay
        };

        jittered.min(self.config.max_delay())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_retries,
            initial_delay_ms: 10,
            backoff_multiplier: 2.0,
            max_delay_ms: 50,
            jitter_factor: 0.0,
        })
    }

    #[tokio::test]
    async fn failing_operation_is_invoked_exactly_max_retries_plus_one_times() {
        let invocations = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();

        let counter = invocations.clone();
        let result: Result<(), _> = policy(3)
            .execute(
                move |_| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err::<(), _>("down")
                    }
                },
                "always_fails",
                &token,
            )
            .await;

        assert_eq!(invocations.load(Ordering::SeqCst), 4);
        match result {
            Err(RetryError::Exhausted { attempts, errors }) => {
                assert_eq!(attempts, 4);
                assert_eq!(errors.len(), 4);
                assert_eq!(*errors.last().unwrap(), "down");
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn one_failure_then_success_takes_two_invocations() {
        let invocations = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();

        let counter = invocations.clone();
        let result = policy(3)
            .execute(
                move |attempt| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        if attempt == 1 {
                            Err("flaky")
                        } else {
                            Ok("recovered")
                        }
                    }
                },
                "flaky_once",
                &token,
            )
            .await;

        assert_eq!(result.unwrap(), "recovered");
        assert_eq!(invocations.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_retryable_errors_are_rethrown_immediately() {
        let invocations = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();

        let counter = invocations.clone();
        let result: Result<(), _> = policy(5)
            .execute_filtered(
                move |_| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err::<(), _>("validation failed")
                    }
                },
                |err| !err.contains("validation"),
                "validated_op",
                &token,
            )
            .await;

        assert_eq!(invocations.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(RetryError::NonRetryable(_))));
    }

    #[tokio::test]
    async fn cancellation_during_backoff_aborts_immediately() {
        let token = CancellationToken::new();
        let cancel_after_first = token.clone();

        let result: Result<(), _> = RetryPolicy::new(RetryConfig {
            max_retries: 5,
            initial_delay_ms: 5_000,
            backoff_multiplier: 2.0,
            max_delay_ms: 10_000,
            jitter_factor: 0.0,
        })
        .execute(
            move |_| {
                let token = cancel_after_first.clone();
                async move {
                    // Fail once, then cancel so the backoff sleep aborts.
                    token.cancel();
                    Err::<(), _>("down")
                }
            },
            "cancelled_op",
            &token,
        )
        .await;

        assert!(matches!(result, Err(RetryError::Cancelled)));
    }

    #[test]
    fn delays_follow_the_backoff_curve_and_cap() {
        let policy = policy(5);
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(10));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(20));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(40));
        // Capped by max_delay_ms.
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(50));
    }
}
