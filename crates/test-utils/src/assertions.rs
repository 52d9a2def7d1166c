//! Test assertion helpers.
//!
//! Provides polling-based assertions for async test scenarios.

use std::time::Duration;

use tokio::time::{Instant, sleep};

/// Default polling interval for [`assert_eventually`].
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Polls a condition until it returns true or the timeout expires.
///
/// This is useful for testing async operations where the exact timing
/// is non-deterministic. It avoids flaky tests that use fixed sleeps.
///
/// # Arguments
///
/// * `timeout` - Maximum wait duration
/// * `condition` - Closure returning `true` when the expected state holds
///
/// # Returns
///
/// `true` if the condition became true before timeout, `false` otherwise.
///
/// # Example
///
/// ```no_run
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use std::sync::Arc;
/// use std::time::Duration;
/// use vigil_test_utils::assert_eventually;
///
/// #[tokio::test]
/// async fn test_subscription_released() {
///     let released = Arc::new(AtomicBool::new(false));
///     let flag = released.clone();
///
///     // Drop a subscription; its task winds down in the background
///     tokio::spawn(async move {
///         tokio::time::sleep(Duration::from_millis(50)).await;
///         flag.store(true, Ordering::SeqCst);
///     });
///
///     let result = assert_eventually(Duration::from_millis(200), || {
///         released.load(Ordering::SeqCst)
///     }).await;
///
///     assert!(result, "subscription should be released");
/// }
/// ```
pub async fn assert_eventually<F>(timeout: Duration, condition: F) -> bool
where
    F: Fn() -> bool,
{
    let start = Instant::now();

    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        sleep(DEFAULT_POLL_INTERVAL).await;
    }

    // Final check after timeout
    condition()
}
