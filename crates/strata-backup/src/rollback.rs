//! Restore an installation from a backup
//!
//! Each tree is extracted into a sibling staging directory first; only then
//! is the live tree removed and the staged copy renamed into place. The swap
//! is two steps, so a crash in between leaves the tree absent. Errors raised
//! at that point carry remediation naming the staged copy.

use crate::archive::{calculate_checksum, extract_archive, validate_archive};
use crate::error::{Error, Result};
use crate::manager::BackupManager;
use crate::record::BackupRecord;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outcome of a successful rollback
#[derive(Debug, Clone)]
pub struct RollbackReport {
    pub backup_id: String,
    pub install_restored: PathBuf,
    pub config_restored: Option<PathBuf>,
    pub duration: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct RollbackManager;

impl RollbackManager {
    pub fn new() -> Self {
        Self
    }

    /// Check that every archive of `record` exists, matches its checksum and
    /// is a complete tar+gzip stream.
    pub fn validate(&self, record: &BackupRecord) -> Result<()> {
        check_archive(&record.id, &record.install_archive, &record.install_sha256)?;
        if let Some(config_archive) = &record.config_archive {
            let expected = record.config_sha256.as_deref().ok_or_else(|| {
                Error::invalid_backup(&record.id, "config archive has no recorded checksum")
            })?;
            check_archive(&record.id, config_archive, expected)?;
        }
        Ok(())
    }

    /// Restore `install_path` (and the config tree, when the backup has one)
    /// from `record`.
    ///
    /// The config target is `config_path`, or the directory the config
    /// archive was taken from.
    pub fn rollback(
        &self,
        record: &BackupRecord,
        install_path: &Path,
        config_path: Option<&Path>,
    ) -> Result<RollbackReport> {
        let start = Instant::now();
        info!(
            "Starting rollback to backup {} ({})",
            record.id, record.source_version_ref
        );

        info!("Stage 1/3: Validating backup");
        self.validate(record)?;

        info!("Stage 2/3: Restoring installation");
        restore_tree(&record.install_archive, install_path)?;

        let mut config_restored = None;
        if let Some(config_archive) = &record.config_archive {
            match config_path.or(record.config_source.as_deref()) {
                Some(target) => {
                    info!("Stage 3/3: Restoring configuration");
                    restore_tree(config_archive, target)?;
                    config_restored = Some(target.to_path_buf());
                }
                None => warn!(
                    "Backup {} has a config archive but no target directory, skipping it",
                    record.id
                ),
            }
        } else {
            debug!("Stage 3/3: No configuration archive");
        }

        let duration = start.elapsed();
        info!(
            "Rollback to {} complete in {:?}",
            record.source_version_ref, duration
        );

        Ok(RollbackReport {
            backup_id: record.id.clone(),
            install_restored: install_path.to_path_buf(),
            config_restored,
            duration,
        })
    }

    /// Look up `id` in `backup_dir` and roll back to it
    pub fn rollback_by_id(
        &self,
        backup_dir: &Path,
        id: &str,
        install_path: &Path,
        config_path: Option<&Path>,
    ) -> Result<RollbackReport> {
        let record = BackupManager::new(backup_dir)
            .find(id)?
            .ok_or_else(|| {
                Error::invalid_backup(id, format!("no such backup in {}", backup_dir.display()))
            })?;
        self.rollback(&record, install_path, config_path)
    }
}

fn check_archive(id: &str, archive: &Path, expected_sha256: &str) -> Result<()> {
    if !archive.is_file() {
        return Err(Error::invalid_backup(
            id,
            format!("archive {} is missing", archive.display()),
        ));
    }

    let actual = calculate_checksum(archive)
        .map_err(|e| Error::invalid_backup(id, format!("cannot read {}: {}", archive.display(), e)))?;
    if actual != expected_sha256 {
        return Err(Error::invalid_backup(
            id,
            format!("checksum mismatch for {}", archive.display()),
        ));
    }

    validate_archive(archive).map_err(|e| {
        Error::invalid_backup(
            id,
            format!("{} is not a readable archive: {}", archive.display(), e),
        )
    })?;
    Ok(())
}

/// Extract `archive` beside `target`, then swap it in
fn restore_tree(archive: &Path, target: &Path) -> Result<()> {
    let (parent, name) = match (target.parent(), target.file_name()) {
        (Some(parent), Some(name)) => (parent, name.to_string_lossy()),
        _ => {
            return Err(Error::rollback_failed(
                format!("cannot restore into {}", target.display()),
                "Nothing was changed.",
            ))
        }
    };

    fs::create_dir_all(parent).map_err(|e| {
        Error::rollback_failed(
            format!("cannot create {}: {}", parent.display(), e),
            "Nothing was changed.",
        )
    })?;

    let staging = parent.join(format!(".{}.rollback-{}", name, Uuid::new_v4().simple()));
    debug!("Staging {} into {}", archive.display(), staging.display());

    if let Err(e) = extract_archive(archive, &staging) {
        if let Err(cleanup) = fs::remove_dir_all(&staging) {
            debug!("Could not remove staging dir {}: {}", staging.display(), cleanup);
        }
        return Err(Error::rollback_failed(
            format!("extracting {} failed: {}", archive.display(), e),
            format!("{} was not modified.", target.display()),
        ));
    }

    if target.exists() {
        fs::remove_dir_all(target).map_err(|e| {
            Error::rollback_failed(
                format!("removing {} failed: {}", target.display(), e),
                format!(
                    "{} may be partially removed. The restored copy is staged at {}; \
                     delete {} and move the staged copy into its place.",
                    target.display(),
                    staging.display(),
                    target.display()
                ),
            )
        })?;
    }

    fs::rename(&staging, target).map_err(|e| {
        Error::rollback_failed(
            format!("moving restored tree into {} failed: {}", target.display(), e),
            format!(
                "{} is currently absent. Move {} to {} to finish the rollback.",
                target.display(),
                staging.display(),
                target.display()
            ),
        )
    })?;

    debug!("Restored {}", target.display());
    Ok(())
}
