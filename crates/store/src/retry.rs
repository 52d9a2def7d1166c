//! Retry logic with exponential backoff.
//!
//! Provides a retry wrapper using the `backon` crate with a configurable
//! backoff policy.

use std::{
    future::Future,
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};

use backon::{BackoffBuilder, ExponentialBuilder, Retryable};
use rand::Rng;
use vigil_types::{Result, VigilError, config::RetryPolicy};

/// Execute an async operation with retry using exponential backoff.
///
/// The operation is retried according to the provided [`RetryPolicy`] if it
/// fails with a retryable error (as determined by [`VigilError::is_retryable`]).
///
/// # Retry Strategy
///
/// - **Exponential backoff**: `initial_backoff * multiplier^(attempt-1)`
/// - **Jitter**: ±`jitter` randomness applied to every delay
/// - **Cap**: Backoff capped at `max_backoff` before jitter
/// - **Termination**: After `max_attempts` failed attempts
///
/// # Non-Retryable Errors
///
/// Validation, not-found and transition errors are returned immediately. A
/// retryable error that survives every attempt is wrapped in
/// [`VigilError::RetryExhausted`].
pub async fn with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &'static str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    // backon's max_times is the number of retries, not total attempts.
    let max_retries = policy.max_attempts.saturating_sub(1) as usize;
    let jitter = policy.jitter;

    let backoff = ExponentialBuilder::new()
        .with_min_delay(policy.initial_backoff)
        .with_max_delay(policy.max_backoff)
        .with_factor(policy.multiplier as f32)
        .with_max_times(max_retries)
        .build()
        .map(move |delay| apply_jitter(delay, jitter));

    let attempts = AtomicU32::new(0);

    let counted = || {
        attempts.fetch_add(1, Ordering::SeqCst);
        operation()
    };

    counted
        .retry(backoff)
        .sleep(tokio::time::sleep)
        .when(VigilError::is_retryable)
        .notify(|err: &VigilError, delay: Duration| {
            tracing::debug!(
                operation = operation_name,
                attempt = attempts.load(Ordering::SeqCst),
                backoff_ms = delay.as_millis() as u64,
                error = %err,
                "retrying store operation after backoff"
            );
        })
        .await
        .map_err(|err| {
            if err.is_retryable() {
                let attempts = attempts.load(Ordering::SeqCst);
                tracing::warn!(
                    operation = operation_name,
                    attempts,
                    error = %err,
                    "store operation failed after all retries"
                );
                VigilError::RetryExhausted { attempts, last_error: err.to_string() }
            } else {
                err
            }
        })
}

/// Apply jitter to a duration.
///
/// Jitter picks a value in `[dur * (1 - factor), dur * (1 + factor)]` so that
/// callers failing together do not retry in lockstep.
fn apply_jitter(dur: Duration, factor: f64) -> Duration {
    if factor <= 0.0 {
        return dur;
    }

    let factor = factor.clamp(0.0, 1.0);
    let mut rng = rand::rng();

    let base_nanos = dur.as_nanos() as f64;
    let min_nanos = base_nanos * (1.0 - factor);
    let max_nanos = base_nanos * (1.0 + factor);

    let jittered_nanos = rng.random_range(min_nanos..=max_nanos);
    Duration::from_nanos(jittered_nanos as u64)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::Arc;

    use vigil_types::ErrorCode;

    use super::*;

    fn test_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(100),
            multiplier: 2.0,
            jitter: 0.0,
        }
    }

    fn unavailable() -> VigilError {
        VigilError::StoreUnavailable { message: "down".to_string() }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = with_retry(&test_policy(), "op", || {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, VigilError>("ok")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_then_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = with_retry(&test_policy(), "op", || {
            let calls = Arc::clone(&calls);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 { Err(unavailable()) } else { Ok(7) }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_wraps_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let result: Result<()> = with_retry(&test_policy(), "op", || {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(VigilError::Timeout { duration_ms: 5 })
            }
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.code(), ErrorCode::StoreRetryExhausted);
        assert!(matches!(err, VigilError::RetryExhausted { attempts: 3, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_returns_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let result: Result<()> = with_retry(&test_policy(), "op", || {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(VigilError::VisitorNotFound { id: "x".to_string() })
            }
        })
        .await;

        assert_eq!(result.unwrap_err().code(), ErrorCode::VisitorNotFound);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_apply_jitter_stays_in_range() {
        let base = Duration::from_millis(100);
        for _ in 0..100 {
            let jittered = apply_jitter(base, 0.25);
            assert!(jittered >= Duration::from_millis(75));
            assert!(jittered <= Duration::from_millis(125));
        }
        assert_eq!(apply_jitter(base, 0.0), base);
    }
}
