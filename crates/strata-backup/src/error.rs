//! Error types for strata-backup

use thiserror::Error;

/// Result type alias using strata-backup's Error type
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Creating a backup failed; nothing of it was left behind
    #[error("Backup failed: {message}")]
    BackupFailed { message: String },

    /// A backup is missing, unreadable, or does not match its metadata
    #[error("Invalid backup {id}: {reason}")]
    InvalidBackup { id: String, reason: String },

    /// Restoring a backup failed part way
    #[error("Rollback failed: {message}\n{remediation}")]
    RollbackFailed { message: String, remediation: String },

    /// The caller asked the operation to stop
    #[error("Backup cancelled")]
    Cancelled,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Metadata (de)serialization error
    #[error("Backup metadata error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error from strata-core
    #[error(transparent)]
    Core(#[from] strata_core::Error),
}

impl Error {
    pub fn backup_failed(message: impl Into<String>) -> Self {
        Self::BackupFailed {
            message: message.into(),
        }
    }

    pub fn invalid_backup(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidBackup {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn rollback_failed(message: impl Into<String>, remediation: impl Into<String>) -> Self {
        Self::RollbackFailed {
            message: message.into(),
            remediation: remediation.into(),
        }
    }
}
