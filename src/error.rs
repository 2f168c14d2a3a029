//! Error types for rewind operations.

use thiserror::Error;

use crate::timestamp::Timestamp;

/// Result type alias using [`RewindError`].
pub type Result<T> = std::result::Result<T, RewindError>;

/// Error types for rewind operations.
#[derive(Debug, Error)]
pub enum RewindError {
    // ==================== I/O Errors ====================
    /// An operating system I/O failure, with the operation that triggered it.
    #[error("I/O error while {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// General storage error that does not carry an OS error.
    #[error("Storage error: {0}")]
    StorageError(String),

    // ==================== Corruption Errors ====================
    /// A rollback log entry failed checksum validation.
    #[error("Checksum mismatch for page {page_number} at timestamp {timestamp}")]
    ChecksumMismatch { page_number: u32, timestamp: Timestamp },

    /// A rollback log file is structurally damaged.
    #[error("Corrupted rollback log: {0}")]
    CorruptedLog(String),

    /// A snapshot file is structurally damaged.
    #[error("Corrupted snapshot: {0}")]
    CorruptedSnapshot(String),

    /// A page pre-image could not be decompressed.
    #[error("Decompression error: {0}")]
    Decompression(String),

    /// Page metadata or backup manifest failed validation.
    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),

    // ==================== Concurrency Errors ====================
    /// Another backup holds the lock for this database branch.
    #[error("Backup already in progress for {0}")]
    BackupInProgress(String),

    /// A frame cannot be discarded because it is not the tail of the log.
    #[error(
        "Rollback cannot be discarded: frame at offset {offset} with size {size} does not end at log length {length}"
    )]
    RollbackConflict { offset: u64, size: u64, length: u64 },

    /// Another frame is still open on the same rollback log.
    #[error("Rollback frame at offset {offset} is still open")]
    FrameInProgress { offset: u64 },

    // ==================== Not Found Errors ====================
    /// No checkpoint was recorded at or before the requested instant.
    #[error("No restore point found for timestamp {timestamp}")]
    RestorePointNotFound { timestamp: Timestamp },

    /// No backup exists for the requested instant.
    #[error("No backup found for timestamp {timestamp}")]
    BackupNotFound { timestamp: Timestamp },

    // ==================== Validation Errors ====================
    /// Caller supplied an invalid argument.
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl RewindError {
    /// Wraps an I/O error with a description of the failed operation.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        RewindError::Io {
            context: context.into(),
            source,
        }
    }

    /// Returns true if the error indicates damaged on-disk state.
    ///
    /// Corruption is never retried: a restore or backup that hits it must halt.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            RewindError::ChecksumMismatch { .. }
                | RewindError::CorruptedLog(_)
                | RewindError::CorruptedSnapshot(_)
                | RewindError::Decompression(_)
                | RewindError::InvalidMetadata(_)
        )
    }

    /// Returns true if the error is caused by a competing operation.
    #[must_use]
    pub fn is_concurrency(&self) -> bool {
        matches!(
            self,
            RewindError::BackupInProgress(_)
                | RewindError::RollbackConflict { .. }
                | RewindError::FrameInProgress { .. }
        )
    }

    /// Returns true if the requested restore point or backup does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RewindError::RestorePointNotFound { .. } | RewindError::BackupNotFound { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_keeps_source() {
        let err = RewindError::io(
            "opening rollback log",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.to_string().contains("opening rollback log"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_classification() {
        let corrupt = RewindError::ChecksumMismatch {
            page_number: 3,
            timestamp: 10,
        };
        assert!(corrupt.is_corruption());
        assert!(!corrupt.is_concurrency());

        let busy = RewindError::BackupInProgress("db/main".into());
        assert!(busy.is_concurrency());
        assert!(!busy.is_not_found());
        assert!(RewindError::FrameInProgress { offset: 0 }.is_concurrency());

        let missing = RewindError::RestorePointNotFound { timestamp: 1 };
        assert!(missing.is_not_found());
        assert!(!missing.is_corruption());
    }
}
