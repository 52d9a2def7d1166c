//! Temporary directory management for tests.
//!
//! [`TestDir`] wraps [`tempfile::TempDir`] for tests that write audit logs or
//! configuration files.

// Test utilities are expected to panic on failure - that's their purpose
#![allow(clippy::expect_used)]

use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// A managed temporary directory for tests.
///
/// The directory is automatically cleaned up when this struct is dropped.
///
/// # Example
///
/// ```
/// use vigil_test_utils::TestDir;
///
/// let dir = TestDir::new();
/// let audit_path = dir.path_string("audit.jsonl");
/// // Point an AuditConfig at audit_path...
/// // Directory cleaned up when `dir` goes out of scope
/// ```
pub struct TestDir {
    inner: TempDir,
}

impl TestDir {
    /// Create a new temporary directory.
    ///
    /// # Panics
    ///
    /// Panics if the temporary directory cannot be created.
    #[must_use]
    pub fn new() -> Self {
        let inner = TempDir::new().expect("failed to create temp directory");
        Self { inner }
    }

    /// Returns the path to the temporary directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    /// Join a relative path to the temporary directory.
    #[must_use]
    pub fn join<P: AsRef<Path>>(&self, path: P) -> PathBuf {
        self.inner.path().join(path)
    }

    /// Joined path as a `String`, the form config structs take paths in.
    #[must_use]
    pub fn path_string<P: AsRef<Path>>(&self, path: P) -> String {
        self.join(path).to_string_lossy().into_owned()
    }

    /// Writes `contents` to a file in the directory and returns its path.
    ///
    /// # Panics
    ///
    /// Panics if the file cannot be written.
    pub fn write_file<P: AsRef<Path>>(&self, path: P, contents: &str) -> PathBuf {
        let target = self.join(path);
        std::fs::write(&target, contents).expect("failed to write test file");
        target
    }
}

impl Default for TestDir {
    fn default() -> Self {
        Self::new()
    }
}
