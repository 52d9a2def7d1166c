//! Shared test utilities for Vigil crates.
//!
//! This crate provides common test helpers to reduce boilerplate across test modules:
//!
//! - [`TestDir`] - Managed temporary directory with path helpers
//! - [`assert_eventually`] - Poll a condition until it's true or timeout
//! - [`test_gateway_config`] - Fast store gateway configuration for tests
//! - [`test_notifier_config`] - Fast status notifier configuration for tests
//! - [`strategies`] - Proptest generators for domain values

#![deny(unsafe_code)]
// Test utilities are allowed to use unwrap for simplicity
#![cfg_attr(test, allow(clippy::disallowed_methods))]

mod test_dir;
pub use test_dir::TestDir;

mod assertions;
pub use assertions::assert_eventually;

mod config;
pub use config::{test_gateway_config, test_notifier_config, test_retry_policy};

pub mod strategies;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use super::*;

    // ============================================
    // TestDir tests
    // ============================================

    #[test]
    fn test_dir_write_file_lands_inside_directory() {
        let dir = TestDir::new();
        let path = dir.write_file("vigil.toml", "[gateway]\n");
        assert!(path.starts_with(dir.path()));
        assert_eq!(std::fs::read_to_string(path).expect("read back"), "[gateway]\n");
    }

    #[test]
    fn test_dir_path_string_matches_join() {
        let dir = TestDir::new();
        let joined = dir.join("audit.jsonl");
        assert_eq!(dir.path_string("audit.jsonl"), joined.to_string_lossy());
    }

    #[test]
    fn test_dir_cleanup_on_drop() {
        let path = {
            let dir = TestDir::new();
            let p = dir.path().to_path_buf();
            std::fs::write(p.join("file.txt"), "data").expect("write file");
            assert!(p.exists());
            p
        };
        assert!(!path.exists(), "temp directory should be cleaned up on drop");
    }

    // ============================================
    // assert_eventually tests
    // ============================================

    #[tokio::test]
    async fn test_assert_eventually_immediate_success() {
        let result = assert_eventually(Duration::from_millis(100), || true).await;
        assert!(result, "immediately true condition should succeed");
    }

    #[tokio::test]
    async fn test_assert_eventually_delayed_success() {
        // Condition becomes true after a few iterations
        let counter = AtomicUsize::new(0);
        let result = assert_eventually(Duration::from_millis(500), || {
            let val = counter.fetch_add(1, Ordering::SeqCst);
            val >= 3 // Becomes true on 4th call
        })
        .await;
        assert!(result, "condition should eventually become true");
        assert!(counter.load(Ordering::SeqCst) >= 4);
    }

    #[tokio::test]
    async fn test_assert_eventually_timeout() {
        let result = assert_eventually(Duration::from_millis(50), || false).await;
        assert!(!result, "never-true condition should timeout");
    }

    #[tokio::test]
    async fn test_assert_eventually_with_state() {
        use std::sync::{Arc, Mutex};

        // Simulate async state change
        let state = Arc::new(Mutex::new(0));
        let state_clone = state.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            *state_clone.lock().unwrap() = 42;
        });

        let result =
            assert_eventually(Duration::from_millis(200), || *state.lock().unwrap() == 42).await;
        assert!(result, "should detect state change");
    }

    // ============================================
    // Config helper tests
    // ============================================

    #[test]
    fn test_gateway_config_is_valid_and_fast() {
        let config = test_gateway_config();
        assert!(config.validate().is_ok());
        assert!(config.operation_timeout < Duration::from_secs(1));
        assert_eq!(config.retry.jitter, 0.0, "test retries should be deterministic");
    }

    #[test]
    fn test_notifier_config_is_valid_and_fast() {
        let config = test_notifier_config();
        assert!(config.validate().is_ok());
        assert!(config.reconnect_delay < config.liveness_interval);
    }

    // ============================================
    // Strategy smoke tests
    // ============================================

    proptest::proptest! {
        #[test]
        fn test_arb_reason_is_never_blank(reason in strategies::arb_reason()) {
            proptest::prop_assert!(!reason.trim().is_empty());
        }
    }
}
