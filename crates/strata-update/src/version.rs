//! Installed and remote version resolution

use crate::cancel::{run_blocking, CancelFlag};
use crate::error::Result;
use crate::source::SourceControl;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use strata_core::{StateStore, VersionRef};
use tracing::{debug, warn};

/// Result of comparing the installed version with the remote one
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum CheckStatus {
    UpToDate {
        version: VersionRef,
    },
    UpdateAvailable {
        current: VersionRef,
        remote: VersionRef,
    },
}

impl CheckStatus {
    pub fn is_update_available(&self) -> bool {
        matches!(self, Self::UpdateAvailable { .. })
    }
}

pub struct VersionTracker {
    source: Arc<dyn SourceControl>,
    state: StateStore,
    network_timeout: Duration,
}

impl VersionTracker {
    pub fn new(source: Arc<dyn SourceControl>, state: StateStore, network_timeout: Duration) -> Self {
        Self {
            source,
            state,
            network_timeout,
        }
    }

    /// Version checked out in `install_path`.
    ///
    /// Falls back to the recorded installation state, then to `unknown`.
    /// Never touches the network and never fails.
    pub fn current_version(&self, install_path: &Path) -> VersionRef {
        match self.source.local_head(install_path) {
            Ok(Some(head)) => return head,
            Ok(None) => debug!("No local HEAD in {}", install_path.display()),
            Err(e) => warn!("Could not read local version: {}", e),
        }

        match self.state.load() {
            Ok(Some(state)) => state.current_version_ref.unwrap_or_else(VersionRef::unknown),
            Ok(None) => VersionRef::unknown(),
            Err(e) => {
                warn!("Could not read installation state: {}", e);
                VersionRef::unknown()
            }
        }
    }

    /// Version the remote advertises for the tracked branch
    pub async fn remote_version(
        &self,
        install_path: &Path,
        cancel: &CancelFlag,
    ) -> Result<VersionRef> {
        let source = Arc::clone(&self.source);
        let path = install_path.to_path_buf();
        let remote = run_blocking(
            cancel,
            Some(self.network_timeout),
            "remote version query",
            move |flag| source.remote_head(&path, &flag),
        )
        .await?;
        debug!("Remote version: {}", remote);
        Ok(remote)
    }

    /// `UpdateAvailable` whenever the versions differ or `force` is set
    pub fn compare(local: &VersionRef, remote: &VersionRef, force: bool) -> CheckStatus {
        if local == remote && !force {
            CheckStatus::UpToDate {
                version: local.clone(),
            }
        } else {
            CheckStatus::UpdateAvailable {
                current: local.clone(),
                remote: remote.clone(),
            }
        }
    }
}
