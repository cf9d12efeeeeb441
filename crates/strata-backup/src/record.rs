//! Backup metadata and file naming

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use strata_core::VersionRef;

pub(crate) const INSTALL_PREFIX: &str = "install-";
pub(crate) const CONFIG_PREFIX: &str = "config-";
pub(crate) const METADATA_PREFIX: &str = "backup-";
pub(crate) const ARCHIVE_SUFFIX: &str = ".tar.gz";
pub(crate) const METADATA_SUFFIX: &str = ".json";
pub(crate) const STAGING_SUFFIX: &str = ".partial";

/// One recoverable snapshot of the installation (and optionally its configuration).
///
/// Immutable once written. The archive paths are re-based onto the directory
/// the metadata is read from, so a backup directory can be moved as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    /// Timestamp-derived id shared by every file of this backup
    pub id: String,
    pub install_archive: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_archive: Option<PathBuf>,
    /// Version installed when the backup was taken
    pub source_version_ref: VersionRef,
    /// Combined size of the published archives
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub install_sha256: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_sha256: Option<String>,
    /// Directory the install archive was taken from
    pub install_source: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_source: Option<PathBuf>,
    #[serde(default)]
    pub file_count: usize,
}

impl BackupRecord {
    pub fn has_config(&self) -> bool {
        self.config_archive.is_some()
    }

    /// Point the archive paths at `dir`, keeping their file names
    pub(crate) fn rebase(&mut self, dir: &Path) {
        if let Some(name) = self.install_archive.file_name() {
            self.install_archive = dir.join(name);
        }
        if let Some(name) = self.config_archive.as_ref().and_then(|p| p.file_name()) {
            self.config_archive = Some(dir.join(name));
        }
    }
}

/// Backup id for `now`, e.g. `20261019-101500-123`
pub(crate) fn id_for(now: DateTime<Utc>) -> String {
    now.format("%Y%m%d-%H%M%S-%3f").to_string()
}

pub(crate) fn install_archive_name(id: &str) -> String {
    format!("{}{}{}", INSTALL_PREFIX, id, ARCHIVE_SUFFIX)
}

pub(crate) fn config_archive_name(id: &str) -> String {
    format!("{}{}{}", CONFIG_PREFIX, id, ARCHIVE_SUFFIX)
}

pub(crate) fn metadata_name(id: &str) -> String {
    format!("{}{}{}", METADATA_PREFIX, id, METADATA_SUFFIX)
}

pub(crate) fn staging_name(final_name: &str) -> String {
    format!("{}{}", final_name, STAGING_SUFFIX)
}

/// Id of the backup a metadata file belongs to
pub(crate) fn id_from_metadata_name(name: &str) -> Option<&str> {
    name.strip_prefix(METADATA_PREFIX)?
        .strip_suffix(METADATA_SUFFIX)
        .filter(|id| !id.is_empty())
}

/// Id of the backup an archive (published or staged) belongs to
pub(crate) fn id_from_archive_name(name: &str) -> Option<&str> {
    let rest = name
        .strip_prefix(INSTALL_PREFIX)
        .or_else(|| name.strip_prefix(CONFIG_PREFIX))?;
    let rest = rest.strip_suffix(STAGING_SUFFIX).unwrap_or(rest);
    rest.strip_suffix(ARCHIVE_SUFFIX).filter(|id| !id.is_empty())
}
