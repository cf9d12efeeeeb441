//! Version-controlled source of the installation
//!
//! The updater only needs a handful of operations from the install tree's
//! VCS. They are blocking; callers run them on the blocking pool.

mod git;

pub use git::GitSource;

use crate::cancel::CancelFlag;
use crate::error::Result;
use chrono::{DateTime, Utc};
use std::path::Path;
use strata_core::VersionRef;

/// Prefix of the label given to shelved local modifications
pub const SHELF_PREFIX: &str = "strata-autoshelf-";

pub trait SourceControl: Send + Sync {
    /// Commit currently checked out, `None` if it cannot be determined
    fn local_head(&self, install_path: &Path) -> Result<Option<VersionRef>>;

    /// Commit the remote advertises for the tracked branch.
    ///
    /// Must not modify the local repository.
    fn remote_head(&self, install_path: &Path, cancel: &CancelFlag) -> Result<VersionRef>;

    /// Whether tracked or untracked files differ from the checked-out commit
    fn has_local_changes(&self, install_path: &Path) -> Result<bool>;

    /// Set local modifications (including untracked files) aside under `label`
    fn shelve(&self, install_path: &Path, label: &str) -> Result<()>;

    /// Download the tracked branch and return its commit
    fn fetch(&self, install_path: &Path, cancel: &CancelFlag) -> Result<VersionRef>;

    /// Point the tracked branch at `target` and force the work tree to match
    fn hard_sync(&self, install_path: &Path, target: &VersionRef) -> Result<()>;
}

/// Shelf label for `now`, e.g. `strata-autoshelf-20261019-101500`
pub fn shelf_label(now: DateTime<Utc>) -> String {
    format!("{}{}", SHELF_PREFIX, now.format("%Y%m%d-%H%M%S"))
}
