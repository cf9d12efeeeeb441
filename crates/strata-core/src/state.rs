//! Installation state persistence
//!
//! The state file records which version the updater last installed. It is
//! shared with concurrent readers (`strata status`), so every write goes
//! through [`atomic_write`].

use crate::error::{Error, Result};
use crate::utils::atomic_write;
use crate::version::VersionRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstallationState {
    /// Version installed by the last successful apply
    pub current_version_ref: Option<VersionRef>,

    /// When the last successful apply finished
    pub last_update_at: Option<DateTime<Utc>>,

    /// Whether a periodic update trigger is installed
    #[serde(default)]
    pub auto_update_enabled: bool,
}

impl InstallationState {
    /// Record a successful update to `version`
    pub fn record_update(&mut self, version: VersionRef) {
        self.current_version_ref = Some(version);
        self.last_update_at = Some(Utc::now());
    }
}

/// Reads and writes the installation state file
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the state, or `None` if it was never written
    pub fn load(&self) -> Result<Option<InstallationState>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Io(e)),
        };

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| Error::corrupt_state(self.path.display().to_string(), e.to_string()))
    }

    /// Load the state, falling back to defaults when it was never written
    pub fn load_or_default(&self) -> Result<InstallationState> {
        Ok(self.load()?.unwrap_or_default())
    }

    /// Persist the state atomically
    pub fn save(&self, state: &InstallationState) -> Result<()> {
        let content = serde_json::to_string_pretty(state)?;
        atomic_write(&self.path, content.as_bytes())?;
        debug!("Saved installation state to {}", self.path.display());
        Ok(())
    }

    /// Load, modify and save in one step
    pub fn update<F>(&self, mutate: F) -> Result<InstallationState>
    where
        F: FnOnce(&mut InstallationState),
    {
        let mut state = self.load_or_default()?;
        mutate(&mut state);
        self.save(&state)?;
        Ok(state)
    }
}
