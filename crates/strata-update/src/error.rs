//! Error types for strata-update

use std::fmt;
use std::path::PathBuf;
use strata_core::VersionRef;
use thiserror::Error;

/// Result type alias using strata-update's error type
pub type Result<T> = std::result::Result<T, UpdateError>;

/// Step of the apply workflow an error occurred in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyPhase {
    Shelve,
    Fetch,
    Sync,
    Permissions,
    Hooks,
    Persist,
}

impl fmt::Display for ApplyPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Shelve => "shelve",
            Self::Fetch => "fetch",
            Self::Sync => "sync",
            Self::Permissions => "permissions",
            Self::Hooks => "hooks",
            Self::Persist => "persist",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum UpdateError {
    /// Another live process holds the update lock
    #[error("Another update is already running (pid {pid}, lock {})", path.display())]
    LockHeld { path: PathBuf, pid: u32 },

    /// The remote could not be reached in time
    #[error("Remote unavailable: {message}")]
    NetworkUnavailable { message: String },

    /// No backup could be created; the installation was not touched
    #[error("Backup failed: {message}")]
    BackupFailed { message: String },

    #[error("Update failed during {phase}: {message}")]
    ApplyFailed {
        phase: ApplyPhase,
        message: String,
        backup_id: Option<String>,
    },

    /// The recorded state does not show the version that was applied
    #[error("Verification failed: expected {expected}, found {actual}")]
    VerifyFailed {
        expected: VersionRef,
        actual: VersionRef,
        backup_id: Option<String>,
    },

    #[error("Rollback failed: {message}\n{remediation}")]
    RollbackFailed { message: String, remediation: String },

    #[error("Invalid backup {id}: {reason}")]
    InvalidBackup { id: String, reason: String },

    /// The job was interrupted before it finished
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Schedule error: {message}")]
    Schedule { message: String },

    /// Source control failure outside the apply workflow
    #[error("Source control error: {message}")]
    Source { message: String },

    #[error(transparent)]
    Config(#[from] strata_core::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl UpdateError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkUnavailable {
            message: message.into(),
        }
    }

    pub fn apply_failed(phase: ApplyPhase, message: impl Into<String>) -> Self {
        Self::ApplyFailed {
            phase,
            message: message.into(),
            backup_id: None,
        }
    }

    pub fn schedule(message: impl Into<String>) -> Self {
        Self::Schedule {
            message: message.into(),
        }
    }

    pub fn source(message: impl Into<String>) -> Self {
        Self::Source {
            message: message.into(),
        }
    }

    /// Attach the job's backup id to apply/verify failures
    pub fn with_backup(mut self, id: Option<String>) -> Self {
        match &mut self {
            Self::ApplyFailed { backup_id, .. } | Self::VerifyFailed { backup_id, .. } => {
                *backup_id = id;
            }
            _ => {}
        }
        self
    }

    /// Backup id carried by apply/verify failures
    pub fn backup_id(&self) -> Option<&str> {
        match self {
            Self::ApplyFailed { backup_id, .. } | Self::VerifyFailed { backup_id, .. } => {
                backup_id.as_deref()
            }
            _ => None,
        }
    }

    pub fn is_lock_held(&self) -> bool {
        matches!(self, Self::LockHeld { .. })
    }
}

impl From<strata_backup::Error> for UpdateError {
    fn from(err: strata_backup::Error) -> Self {
        use strata_backup::Error as B;
        match err {
            B::BackupFailed { message } => Self::BackupFailed { message },
            B::InvalidBackup { id, reason } => Self::InvalidBackup { id, reason },
            B::RollbackFailed {
                message,
                remediation,
            } => Self::RollbackFailed {
                message,
                remediation,
            },
            B::Cancelled => Self::Cancelled,
            B::Io(e) => Self::Io(e),
            B::Json(e) => Self::BackupFailed {
                message: e.to_string(),
            },
            B::Core(e) => Self::Config(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_backup_only_touches_apply_and_verify() {
        let err = UpdateError::apply_failed(ApplyPhase::Hooks, "boom").with_backup(Some("b1".into()));
        assert_eq!(err.backup_id(), Some("b1"));

        let err = UpdateError::Cancelled.with_backup(Some("b1".into()));
        assert_eq!(err.backup_id(), None);
    }

    #[test]
    fn test_backup_errors_map_onto_taxonomy() {
        let err: UpdateError = strata_backup::Error::invalid_backup("x", "missing").into();
        assert!(matches!(err, UpdateError::InvalidBackup { .. }));

        let err: UpdateError = strata_backup::Error::rollback_failed("m", "do this").into();
        match err {
            UpdateError::RollbackFailed { remediation, .. } => assert_eq!(remediation, "do this"),
            other => panic!("unexpected {:?}", other),
        }

        let err: UpdateError = strata_backup::Error::Cancelled.into();
        assert!(matches!(err, UpdateError::Cancelled));
    }

    #[test]
    fn test_display() {
        let err = UpdateError::apply_failed(ApplyPhase::Sync, "conflict");
        assert_eq!(err.to_string(), "Update failed during sync: conflict");

        let err = UpdateError::LockHeld {
            path: PathBuf::from("/tmp/update.lock"),
            pid: 42,
        };
        assert!(err.to_string().contains("pid 42"));
        assert!(err.is_lock_held());
    }
}
