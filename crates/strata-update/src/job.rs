//! Update job state machine

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use strata_core::VersionRef;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobState {
    Idle,
    CheckingVersion,
    CreatingBackup,
    Applying,
    Verifying,
    RollingBack,
    Complete,
    Failed,
}

impl JobState {
    /// Whether the machine may move from `self` to `next`
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Idle, CheckingVersion)
                | (CheckingVersion, Idle)
                | (CheckingVersion, CreatingBackup)
                // Backups skipped
                | (CheckingVersion, Applying)
                | (CheckingVersion, Failed)
                | (CreatingBackup, Applying)
                | (CreatingBackup, Failed)
                | (Applying, Verifying)
                | (Applying, Failed)
                | (Verifying, Complete)
                | (Verifying, Failed)
                | (Failed, RollingBack)
                | (RollingBack, Idle)
                | (RollingBack, Failed)
                | (Complete, Idle)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::CheckingVersion => "checking-version",
            Self::CreatingBackup => "creating-backup",
            Self::Applying => "applying",
            Self::Verifying => "verifying",
            Self::RollingBack => "rolling-back",
            Self::Complete => "complete",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// How a job that did not fail ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum JobOutcome {
    /// Nothing to do
    UpToDate { version: VersionRef },
    /// The confirmation callback declined the update
    Declined {
        current: VersionRef,
        remote: VersionRef,
    },
    Updated {
        from: VersionRef,
        to: VersionRef,
        backup_id: Option<String>,
    },
    /// The update failed and the job's backup was restored
    RolledBack {
        backup_id: String,
        cause: String,
    },
}

/// One run of the update workflow
#[derive(Debug, Clone, Serialize)]
pub struct UpdateJob {
    pub state: JobState,
    pub started_at: DateTime<Utc>,
    /// Backup created by this job
    pub backup_ref: Option<String>,
    pub error: Option<String>,
    pub from_version: Option<VersionRef>,
    pub to_version: Option<VersionRef>,
    /// Every state entered, starting with `Idle`
    pub history: Vec<JobState>,
    pub outcome: Option<JobOutcome>,
}

impl Default for UpdateJob {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdateJob {
    pub fn new() -> Self {
        Self {
            state: JobState::Idle,
            started_at: Utc::now(),
            backup_ref: None,
            error: None,
            from_version: None,
            to_version: None,
            history: vec![JobState::Idle],
            outcome: None,
        }
    }

    pub fn transition(&mut self, next: JobState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal job transition {} -> {}",
            self.state,
            next
        );
        debug!("Job state: {} -> {}", self.state, next);
        self.state = next;
        self.history.push(next);
    }

    /// Move to `Failed`, remembering the error
    pub fn fail(&mut self, error: &impl fmt::Display) {
        self.error = Some(error.to_string());
        self.transition(JobState::Failed);
    }

    pub fn finish(&mut self, outcome: JobOutcome) {
        self.outcome = Some(outcome);
    }
}
