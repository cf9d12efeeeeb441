//! Backup creation, listing and retention

use crate::archive::{calculate_checksum, create_archive, DEFAULT_COMPRESSION_LEVEL};
use crate::error::{Error, Result};
use crate::record::{self, BackupRecord};
use chrono::Utc;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use strata_core::{atomic_write, VersionRef};
use tracing::{debug, info, warn};

/// Backups retained by default
pub const DEFAULT_KEEP: usize = 5;

/// What a prune removed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Ids of complete backups that were deleted
    pub removed: Vec<String>,
    /// Archives that had no metadata marker
    pub orphans_removed: Vec<PathBuf>,
}

impl PruneReport {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.orphans_removed.is_empty()
    }
}

/// Manages the backup directory
#[derive(Debug, Clone)]
pub struct BackupManager {
    dir: PathBuf,
    compression_level: u32,
}

impl BackupManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }

    /// Set compression level (1-9)
    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = level.clamp(1, 9);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Snapshot `install_path` (and `config_path` when `include_config`).
    ///
    /// Archives are staged as `*.partial` and renamed into place; the
    /// metadata file is published last. On failure every file carrying the
    /// new id is removed and `BackupFailed` is returned.
    pub fn create(
        &self,
        install_path: &Path,
        config_path: Option<&Path>,
        include_config: bool,
        version: &VersionRef,
    ) -> Result<BackupRecord> {
        self.create_with_abort(install_path, config_path, include_config, version, &|| false)
    }

    /// [`create`](Self::create), stopping with `Error::Cancelled` once
    /// `abort` returns true. A cancelled backup leaves no files behind.
    pub fn create_with_abort(
        &self,
        install_path: &Path,
        config_path: Option<&Path>,
        include_config: bool,
        version: &VersionRef,
        abort: &dyn Fn() -> bool,
    ) -> Result<BackupRecord> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            Error::backup_failed(format!(
                "cannot create backup directory {}: {}",
                self.dir.display(),
                e
            ))
        })?;

        if !install_path.is_dir() {
            return Err(Error::backup_failed(format!(
                "installation directory {} does not exist",
                install_path.display()
            )));
        }

        let id = self.allocate_id();
        info!("Creating backup {} of {}", id, install_path.display());

        let config_path = if include_config { config_path } else { None };
        match self.write_backup(&id, install_path, config_path, version, abort) {
            Ok(record) => {
                info!(
                    "Backup {} created ({} files, {} bytes)",
                    record.id, record.file_count, record.size_bytes
                );
                Ok(record)
            }
            Err(e) => {
                warn!("Backup {} failed, removing partial files: {}", id, e);
                self.remove_files_for(&id);
                Err(match e {
                    Error::BackupFailed { .. } | Error::Cancelled => e,
                    other => Error::backup_failed(other.to_string()),
                })
            }
        }
    }

    fn write_backup(
        &self,
        id: &str,
        install_path: &Path,
        config_path: Option<&Path>,
        version: &VersionRef,
        abort: &dyn Fn() -> bool,
    ) -> Result<BackupRecord> {
        let exclude = fs::canonicalize(&self.dir)?;
        let install_source = fs::canonicalize(install_path)?;

        let install_archive = self.dir.join(record::install_archive_name(id));
        let stats = self.publish_archive(&install_source, &install_archive, &exclude, abort)?;
        let install_sha256 = calculate_checksum(&install_archive)?;
        let mut size_bytes = fs::metadata(&install_archive)?.len();

        let mut config_archive = None;
        let mut config_sha256 = None;
        let mut config_source = None;
        if let Some(config_path) = config_path {
            if config_path.is_dir() {
                let source = fs::canonicalize(config_path)?;
                let archive = self.dir.join(record::config_archive_name(id));
                self.publish_archive(&source, &archive, &exclude, abort)?;
                config_sha256 = Some(calculate_checksum(&archive)?);
                size_bytes += fs::metadata(&archive)?.len();
                config_archive = Some(archive);
                config_source = Some(source);
            } else {
                warn!(
                    "Configuration directory {} not found, backing up the installation only",
                    config_path.display()
                );
            }
        }

        let record = BackupRecord {
            id: id.to_string(),
            install_archive,
            config_archive,
            source_version_ref: version.clone(),
            size_bytes,
            created_at: Utc::now(),
            install_sha256,
            config_sha256,
            install_source,
            config_source,
            file_count: stats.file_count,
        };

        // Commit marker
        let json = serde_json::to_vec_pretty(&record)?;
        atomic_write(&self.dir.join(record::metadata_name(id)), &json)?;
        Ok(record)
    }

    /// Archive `source` under a staging name, then rename to `dest`
    fn publish_archive(
        &self,
        source: &Path,
        dest: &Path,
        exclude: &Path,
        abort: &dyn Fn() -> bool,
    ) -> Result<crate::archive::ArchiveStats> {
        let file_name = dest
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::backup_failed(format!("bad archive path {}", dest.display())))?;
        let staged = self.dir.join(record::staging_name(file_name));

        let stats = create_archive(source, &staged, Some(exclude), self.compression_level, abort)?;
        fs::rename(&staged, dest)?;
        debug!("Published {}", dest.display());
        Ok(stats)
    }

    /// A fresh id that no file in the directory uses yet
    fn allocate_id(&self) -> String {
        let base = record::id_for(Utc::now());
        let mut id = base.clone();
        let mut suffix = 1;
        while self.id_in_use(&id) {
            id = format!("{}-{}", base, suffix);
            suffix += 1;
        }
        id
    }

    fn id_in_use(&self, id: &str) -> bool {
        self.file_names_for(id)
            .iter()
            .any(|name| self.dir.join(name).exists())
    }

    fn file_names_for(&self, id: &str) -> [String; 5] {
        let install = record::install_archive_name(id);
        let config = record::config_archive_name(id);
        [
            record::metadata_name(id),
            record::staging_name(&install),
            record::staging_name(&config),
            install,
            config,
        ]
    }

    /// Best-effort removal of every file of one backup id
    fn remove_files_for(&self, id: &str) {
        for name in self.file_names_for(id) {
            if let Err(e) = remove_if_exists(&self.dir.join(&name)) {
                warn!("Failed to remove {}: {}", name, e);
            }
        }
    }

    /// All complete backups, newest first.
    ///
    /// Metadata that cannot be read or parsed is skipped with a warning.
    pub fn list(&self) -> Result<Vec<BackupRecord>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if record::id_from_metadata_name(name).is_none() {
                continue;
            }

            match read_record(&entry.path()) {
                Ok(mut record) => {
                    record.rebase(&self.dir);
                    records.push(record);
                }
                Err(e) => warn!("Ignoring unreadable backup metadata {}: {}", name, e),
            }
        }

        records.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(records)
    }

    /// Look up one backup by id
    pub fn find(&self, id: &str) -> Result<Option<BackupRecord>> {
        Ok(self.list()?.into_iter().find(|r| r.id == id))
    }

    /// Keep the newest `keep` backups (at least one) and delete the rest.
    ///
    /// For each deleted backup the metadata marker goes first, so an
    /// interrupted prune never leaves a listed backup without archives.
    /// Archives with no marker are swept afterwards.
    pub fn prune(&self, keep: usize) -> Result<PruneReport> {
        let keep = keep.max(1);
        let mut report = PruneReport::default();

        for old in self.list()?.into_iter().skip(keep) {
            remove_if_exists(&self.dir.join(record::metadata_name(&old.id)))?;
            remove_if_exists(&old.install_archive)?;
            if let Some(config_archive) = &old.config_archive {
                remove_if_exists(config_archive)?;
            }
            info!("Pruned backup {}", old.id);
            report.removed.push(old.id);
        }

        report.orphans_removed = self.sweep_orphans()?;
        Ok(report)
    }

    /// Remove archives whose id has no metadata marker
    fn sweep_orphans(&self) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries.collect::<io::Result<Vec<_>>>()?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let names: Vec<String> = entries
            .iter()
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .collect();
        let marked: HashSet<&str> = names
            .iter()
            .filter_map(|n| record::id_from_metadata_name(n))
            .collect();

        let mut removed = Vec::new();
        for name in &names {
            match record::id_from_archive_name(name) {
                Some(id) if !marked.contains(id) => {
                    let path = self.dir.join(name);
                    remove_if_exists(&path)?;
                    warn!("Removed orphaned archive {}", path.display());
                    removed.push(path);
                }
                _ => {}
            }
        }
        Ok(removed)
    }
}

fn read_record(path: &Path) -> Result<BackupRecord> {
    let content = fs::read(path)?;
    Ok(serde_json::from_slice(&content)?)
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        install: PathBuf,
        config: PathBuf,
        manager: BackupManager,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let install = temp.path().join("install");
        let config = temp.path().join("config");
        fs::create_dir_all(install.join("bin")).unwrap();
        fs::create_dir_all(&config).unwrap();
        fs::write(install.join("bin/tool"), "#!/bin/sh\n").unwrap();
        fs::write(config.join("settings.yaml"), "a: 1\n").unwrap();
        let manager = BackupManager::new(temp.path().join("backups"));
        Fixture {
            _temp: temp,
            install,
            config,
            manager,
        }
    }

    fn dir_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_create_with_config() {
        let f = fixture();
        let record = f
            .manager
            .create(&f.install, Some(&f.config), true, &VersionRef::from("v1"))
            .unwrap();

        assert!(record.install_archive.exists());
        assert!(record.has_config());
        assert!(record.config_archive.as_ref().unwrap().exists());
        assert_eq!(record.source_version_ref.as_str(), "v1");
        assert_eq!(record.file_count, 1);
        assert!(record.size_bytes > 0);
        assert_eq!(record.install_sha256.len(), 64);

        let names = dir_names(f.manager.dir());
        assert_eq!(names.len(), 3);
        assert!(names.iter().all(|n| !n.ends_with(".partial")));
    }

    #[test]
    fn test_create_without_config() {
        let f = fixture();
        let record = f
            .manager
            .create(&f.install, Some(&f.config), false, &VersionRef::from("v1"))
            .unwrap();
        assert!(!record.has_config());
        assert_eq!(dir_names(f.manager.dir()).len(), 2);
    }

    #[test]
    fn test_missing_config_dir_is_skipped() {
        let f = fixture();
        fs::remove_dir_all(&f.config).unwrap();
        let record = f
            .manager
            .create(&f.install, Some(&f.config), true, &VersionRef::from("v1"))
            .unwrap();
        assert!(!record.has_config());
    }

    #[test]
    fn test_missing_install_dir_fails_cleanly() {
        let f = fixture();
        fs::remove_dir_all(&f.install).unwrap();
        let result = f
            .manager
            .create(&f.install, None, false, &VersionRef::from("v1"));

        assert!(matches!(result, Err(Error::BackupFailed { .. })));
        assert!(dir_names(f.manager.dir()).is_empty());
    }

    #[test]
    fn test_cancelled_create_leaves_nothing() {
        let f = fixture();
        let result = f.manager.create_with_abort(
            &f.install,
            Some(&f.config),
            true,
            &VersionRef::from("v1"),
            &|| true,
        );

        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(dir_names(f.manager.dir()).is_empty());
        assert!(f.manager.list().unwrap().is_empty());
    }

    #[test]
    fn test_ids_are_unique() {
        let f = fixture();
        let a = f
            .manager
            .create(&f.install, None, false, &VersionRef::from("v1"))
            .unwrap();
        let b = f
            .manager
            .create(&f.install, None, false, &VersionRef::from("v1"))
            .unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_list_newest_first_and_find() {
        let f = fixture();
        let first = f
            .manager
            .create(&f.install, None, false, &VersionRef::from("v1"))
            .unwrap();
        let second = f
            .manager
            .create(&f.install, None, false, &VersionRef::from("v2"))
            .unwrap();

        let list = f.manager.list().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, second.id);
        assert_eq!(list[1].id, first.id);

        assert_eq!(f.manager.find(&first.id).unwrap(), Some(first));
        assert_eq!(f.manager.find("nope").unwrap(), None);
    }

    #[test]
    fn test_list_ignores_garbage_metadata() {
        let f = fixture();
        f.manager
            .create(&f.install, None, false, &VersionRef::from("v1"))
            .unwrap();
        fs::write(f.manager.dir().join("backup-broken.json"), "{").unwrap();

        assert_eq!(f.manager.list().unwrap().len(), 1);
    }

    #[test]
    fn test_list_missing_dir_is_empty() {
        let temp = TempDir::new().unwrap();
        let manager = BackupManager::new(temp.path().join("none"));
        assert!(manager.list().unwrap().is_empty());
    }

    #[test]
    fn test_backup_dir_nested_in_install_is_excluded() {
        let temp = TempDir::new().unwrap();
        let install = temp.path().join("install");
        fs::create_dir_all(&install).unwrap();
        fs::write(install.join("file"), "x").unwrap();
        let manager = BackupManager::new(install.join("backups"));

        let first = manager
            .create(&install, None, false, &VersionRef::from("v1"))
            .unwrap();
        let second = manager
            .create(&install, None, false, &VersionRef::from("v1"))
            .unwrap();
        assert_eq!(first.file_count, 1);
        assert_eq!(second.file_count, 1);
    }

    #[test]
    fn test_prune_sweeps_orphans() {
        let f = fixture();
        f.manager
            .create(&f.install, None, false, &VersionRef::from("v1"))
            .unwrap();
        let orphan = f.manager.dir().join("config-19990101-000000-000.tar.gz");
        let partial = f
            .manager
            .dir()
            .join("install-19990101-000000-000.tar.gz.partial");
        fs::write(&orphan, "x").unwrap();
        fs::write(&partial, "x").unwrap();

        let report = f.manager.prune(5).unwrap();
        assert!(report.removed.is_empty());
        assert_eq!(report.orphans_removed.len(), 2);
        assert!(!orphan.exists());
        assert!(!partial.exists());
        assert_eq!(f.manager.list().unwrap().len(), 1);
    }
}
