//! Test configuration helpers.
//!
//! Provides fast configurations for tests, centralizing magic values that
//! would otherwise be scattered across test modules.

use std::time::Duration;

use vigil_types::config::{GatewayConfig, NotifierConfig, RetryPolicy};

/// Returns a retry policy with millisecond backoff and no jitter.
///
/// - `max_attempts`: 3
/// - `initial_backoff`: 1ms, `max_backoff`: 10ms
/// - `jitter`: 0.0 (deterministic delays)
#[must_use]
pub fn test_retry_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(10),
        multiplier: 2.0,
        jitter: 0.0,
    }
}

/// Returns a gateway configuration suitable for tests.
///
/// A 200ms deadline keeps latency-injection tests short.
#[must_use]
pub fn test_gateway_config() -> GatewayConfig {
    GatewayConfig { operation_timeout: Duration::from_millis(200), retry: test_retry_policy() }
}

/// Returns a notifier configuration suitable for tests.
///
/// - `reconnect_delay`: 20ms
/// - `max_reconnect_attempts`: 3
/// - `liveness_interval`: 100ms
/// - `redirect_delay`: 3s (unchanged, it is only reported)
#[must_use]
pub fn test_notifier_config() -> NotifierConfig {
    NotifierConfig {
        reconnect_delay: Duration::from_millis(20),
        max_reconnect_attempts: 3,
        liveness_interval: Duration::from_millis(100),
        ..NotifierConfig::default()
    }
}
