//! Error types for tabvm-core

use thiserror::Error;

/// Core error type
#[derive(Debug, Error)]
pub enum CoreError {
    /// Persistent storage could not be opened. Non-fatal at startup.
    #[error("Snapshot store unavailable: {0}")]
    StoreUnavailable(#[source] BackendError),

    /// A user-initiated save could not be persisted.
    #[error("Failed to write snapshot: {0}")]
    WriteFailed(String),

    /// Snapshot is invalid, corrupt or incompatible with the machine.
    #[error("Failed to restore snapshot: {0}")]
    Restore(String),

    #[error("Malformed snapshot encoding: {0}")]
    MalformedEncoding(String),

    #[error("Failed to fetch {location}: {reason}")]
    Fetch { location: String, reason: String },

    #[error("Machine error: {0}")]
    Machine(String),

    #[error("Clipboard error: {0}")]
    Clipboard(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl CoreError {
    /// Fold codec failures into restore failures; everything else is unchanged.
    pub fn into_restore(self) -> Self {
        match self {
            CoreError::MalformedEncoding(reason) => CoreError::Restore(reason),
            other => other,
        }
    }

    pub(crate) fn fetch(location: &str, reason: impl ToString) -> Self {
        CoreError::Fetch {
            location: location.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Errors raised by a key/value storage backend
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Database is not open")]
    NotOpen,

    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    #[error("Stored schema version {stored} is newer than requested {requested}")]
    VersionConflict { stored: u32, requested: u32 },

    #[error("Quota exceeded: {needed} bytes needed, {available} available")]
    QuotaExceeded { needed: usize, available: usize },

    #[error("Transaction aborted: {0}")]
    Aborted(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::WriteFailed("quota".into());
        assert_eq!(err.to_string(), "Failed to write snapshot: quota");
    }

    #[test]
    fn test_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
        let core_err: CoreError = io_err.into();
        assert!(matches!(core_err, CoreError::Io(_)));

        let backend: CoreError = BackendError::NotOpen.into();
        assert!(matches!(backend, CoreError::Backend(BackendError::NotOpen)));
    }

    #[test]
    fn test_malformed_encoding_becomes_restore_error() {
        let err = CoreError::MalformedEncoding("truncated".into()).into_restore();
        assert!(matches!(err, CoreError::Restore(ref r) if r == "truncated"));

        let untouched = CoreError::Machine("boom".into()).into_restore();
        assert!(matches!(untouched, CoreError::Machine(_)));
    }

    #[test]
    fn test_version_conflict_display() {
        let err = BackendError::VersionConflict { stored: 2, requested: 1 };
        assert_eq!(
            err.to_string(),
            "Stored schema version 2 is newer than requested 1"
        );
    }
}
