//! Audit logging for administrator actions.
//!
//! Provides a trait-based audit logger with a file-based implementation that
//! writes JSON Lines (one JSON object per line) to disk with durable writes
//! and log rotation.
//!
//! # Architecture
//!
//! - [`AuditLogger`] trait defines the interface for pluggable backends
//! - [`FileAuditLogger`] writes to disk with `fsync` for durability
//! - [`MemoryAuditLogger`] keeps events in memory for embedding and inspection
//! - [`NullAuditLogger`] is a no-op for when audit logging is disabled
//!
//! # Failure Policy
//!
//! Audit events are emitted after the store commit. A failed audit write is
//! logged at `error` and never rolls back the transition it describes.
//!
//! # Log Rotation
//!
//! When the active log exceeds the configured size limit, it is rotated:
//! `audit.jsonl` → `audit.jsonl.1` → `audit.jsonl.2` → ... → deleted.

use std::{
    fs::{self, File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::Mutex;
use snafu::{ResultExt, Snafu};
use vigil_types::{audit::AuditEvent, config::AuditConfig};

/// Audit logger trait for pluggable audit backends.
pub trait AuditLogger: Send + Sync {
    /// Log an audit event.
    ///
    /// Returns an error if the event cannot be persisted.
    fn log(&self, event: &AuditEvent) -> Result<(), AuditError>;
}

/// No-op audit logger for when audit logging is disabled.
pub struct NullAuditLogger;

impl AuditLogger for NullAuditLogger {
    fn log(&self, _event: &AuditEvent) -> Result<(), AuditError> {
        Ok(())
    }
}

/// Audit logger that keeps every event in memory.
#[derive(Default)]
pub struct MemoryAuditLogger {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditLogger {
    /// Creates an empty logger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the events logged so far.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }
}

impl AuditLogger for MemoryAuditLogger {
    fn log(&self, event: &AuditEvent) -> Result<(), AuditError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// File-based audit logger with durable writes and log rotation.
///
/// # Thread Safety
///
/// The logger is protected by a mutex. Writes and rotations are serialized
/// to prevent data corruption and keep events in emission order.
pub struct FileAuditLogger {
    inner: Mutex<FileAuditLoggerInner>,
    config: AuditConfig,
}

struct FileAuditLoggerInner {
    file: File,
    bytes_written: u64,
}

impl FileAuditLogger {
    /// Creates a new file-based audit logger.
    ///
    /// Opens (or creates) the log file at the configured path. If the file
    /// already exists, new events are appended.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Io`] if the file cannot be opened or created.
    pub fn new(config: AuditConfig) -> Result<Self, AuditError> {
        let path = Path::new(&config.path);

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).context(IoSnafu { path: config.path.clone() })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .context(IoSnafu { path: config.path.clone() })?;

        let bytes_written = file.metadata().context(IoSnafu { path: config.path.clone() })?.len();

        Ok(Self { inner: Mutex::new(FileAuditLoggerInner { file, bytes_written }), config })
    }

    fn rotate(&self, inner: &mut FileAuditLoggerInner) -> Result<(), AuditError> {
        let path = PathBuf::from(&self.config.path);

        let oldest = format!("{}.{}", self.config.path, self.config.max_rotated_files);
        let _ = fs::remove_file(&oldest);

        for i in (1..self.config.max_rotated_files).rev() {
            let from = format!("{}.{}", self.config.path, i);
            let to = format!("{}.{}", self.config.path, i + 1);
            if Path::new(&from).exists() {
                fs::rename(&from, &to).context(IoSnafu { path: from })?;
            }
        }

        let rotated = format!("{}.1", self.config.path);
        fs::rename(&path, &rotated).context(IoSnafu { path: self.config.path.clone() })?;

        inner.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .context(IoSnafu { path: self.config.path.clone() })?;
        inner.bytes_written = 0;

        Ok(())
    }

    /// Returns the current file size in bytes.
    pub fn bytes_written(&self) -> u64 {
        self.inner.lock().bytes_written
    }
}

impl AuditLogger for FileAuditLogger {
    fn log(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let mut line =
            serde_json::to_vec(event).context(SerializationSnafu { event_id: &event.event_id })?;
        line.push(b'\n');

        let mut inner = self.inner.lock();

        if inner.bytes_written > 0
            && inner.bytes_written + line.len() as u64 > self.config.max_file_size_bytes
        {
            self.rotate(&mut inner)?;
        }

        inner.file.write_all(&line).context(IoSnafu { path: &self.config.path })?;
        inner.file.sync_data().context(IoSnafu { path: &self.config.path })?;
        inner.bytes_written += line.len() as u64;

        Ok(())
    }
}

/// Creates an audit logger based on configuration.
///
/// Returns a [`FileAuditLogger`] when auditing is enabled, otherwise a
/// [`NullAuditLogger`].
///
/// # Errors
///
/// Returns [`AuditError::Io`] if the log file cannot be opened.
pub fn create_audit_logger(config: &AuditConfig) -> Result<Arc<dyn AuditLogger>, AuditError> {
    if config.enabled {
        Ok(Arc::new(FileAuditLogger::new(config.clone())?))
    } else {
        Ok(Arc::new(NullAuditLogger))
    }
}

/// Writes an event, logging instead of propagating any failure.
pub(crate) fn emit(logger: &dyn AuditLogger, event: AuditEvent) {
    if let Err(err) = logger.log(&event) {
        tracing::error!(
            action = event.action.as_str(),
            event_id = %event.event_id,
            error = %err,
            "failed to write audit event"
        );
    }
}

/// Audit logging error.
#[derive(Debug, Snafu)]
pub enum AuditError {
    /// I/O error during audit log write or rotation.
    #[snafu(display("Audit I/O error for {path}: {source}"))]
    Io {
        /// Path that caused the error.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Serialization error when encoding audit event.
    #[snafu(display("Failed to serialize audit event {event_id}: {source}"))]
    Serialization {
        /// Event ID that failed to serialize.
        event_id: String,
        /// Underlying serialization error.
        source: serde_json::Error,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use vigil_test_utils::TestDir;
    use vigil_types::{
        VisitorId,
        audit::{AuditAction, AuditResource},
    };

    use super::*;

    fn test_event(action: AuditAction) -> AuditEvent {
        AuditEvent::success("admin1", action, AuditResource::visitor(VisitorId::generate()))
            .with_reason("spam")
    }

    fn test_config(dir: &TestDir, max_file_size_bytes: u64) -> AuditConfig {
        AuditConfig {
            enabled: true,
            path: dir.path_string("logs/audit.jsonl"),
            max_file_size_bytes,
            max_rotated_files: 2,
        }
    }

    #[test]
    fn test_null_audit_logger_always_succeeds() {
        assert!(NullAuditLogger.log(&test_event(AuditAction::Ban)).is_ok());
    }

    #[test]
    fn test_memory_audit_logger_keeps_order() {
        let logger = MemoryAuditLogger::new();
        logger.log(&test_event(AuditAction::Ban)).unwrap();
        logger.log(&test_event(AuditAction::Unban)).unwrap();
        let actions: Vec<_> = logger.events().into_iter().map(|e| e.action).collect();
        assert_eq!(actions, vec![AuditAction::Ban, AuditAction::Unban]);
    }

    #[test]
    fn test_file_audit_logger_writes_json_lines() {
        let dir = TestDir::new();
        let config = test_config(&dir, 100 * 1024 * 1024);
        let logger = FileAuditLogger::new(config.clone()).expect("create logger");

        logger.log(&test_event(AuditAction::Ban)).expect("log event");
        logger.log(&test_event(AuditAction::Unban)).expect("log event");

        let content = fs::read_to_string(&config.path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: AuditEvent = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.action, AuditAction::Ban);
        assert_eq!(logger.bytes_written(), content.len() as u64);
    }

    #[test]
    fn test_file_audit_logger_appends_to_existing_file() {
        let dir = TestDir::new();
        let config = test_config(&dir, 100 * 1024 * 1024);
        FileAuditLogger::new(config.clone()).unwrap().log(&test_event(AuditAction::Ban)).unwrap();

        let reopened = FileAuditLogger::new(config.clone()).unwrap();
        assert!(reopened.bytes_written() > 0);
        reopened.log(&test_event(AuditAction::Unban)).unwrap();
        assert_eq!(fs::read_to_string(&config.path).unwrap().lines().count(), 2);
    }

    #[test]
    fn test_file_audit_logger_rotates_when_full() {
        let dir = TestDir::new();
        // Rotation size below one event forces a rotation on every write after the first.
        let config = test_config(&dir, 16);
        let logger = FileAuditLogger::new(config.clone()).unwrap();

        for _ in 0..4 {
            logger.log(&test_event(AuditAction::Recategorize)).unwrap();
        }

        assert!(Path::new(&format!("{}.1", config.path)).exists());
        assert!(Path::new(&format!("{}.2", config.path)).exists());
        assert!(!Path::new(&format!("{}.3", config.path)).exists());
        assert_eq!(fs::read_to_string(&config.path).unwrap().lines().count(), 1);
    }

    #[test]
    fn test_create_audit_logger_respects_enabled_flag() {
        let dir = TestDir::new();
        let mut config = test_config(&dir, 1024 * 1024);
        config.enabled = false;
        create_audit_logger(&config).unwrap().log(&test_event(AuditAction::Ban)).unwrap();
        assert!(!Path::new(&config.path).exists());

        config.enabled = true;
        create_audit_logger(&config).unwrap().log(&test_event(AuditAction::Ban)).unwrap();
        assert!(Path::new(&config.path).exists());
    }
}
