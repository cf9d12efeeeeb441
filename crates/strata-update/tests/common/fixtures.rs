//! Temp-dir installations and git repositories

#![allow(dead_code)]

use super::mocks::{FakeSource, FakeSystem, VERSION_FILE};
use git2::{Commit, Oid, Repository, RepositoryInitOptions, Signature};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strata_core::{LogEntry, StateStore, UpdateLog, UpdaterConfig, VersionRef};
use strata_update::UpdateOrchestrator;
use tempfile::TempDir;

/// An installation, config dir and state dir under one temp dir
pub struct TestEnv {
    pub temp: TempDir,
    pub config: UpdaterConfig,
}

impl TestEnv {
    /// Installation at `version` with a valid config dir
    pub fn new(version: &str) -> Self {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        let install = root.join("install");
        fs::create_dir_all(install.join("bin")).unwrap();
        fs::write(install.join(VERSION_FILE), format!("{}\n", version)).unwrap();
        fs::write(install.join("bin/strata-tool"), "#!/bin/sh\n").unwrap();

        let config_dir = root.join("config");
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(config_dir.join("settings.yaml"), "profile: default\n").unwrap();

        let mut config = UpdaterConfig {
            install_dir: install,
            config_dir,
            state_dir: root.join("state"),
            ..UpdaterConfig::default()
        };
        config.schedule.unit_dir = root.join("units");
        config.schedule.binary_path = Some(PathBuf::from("/usr/local/bin/strata"));
        config.backup.keep = 3;

        Self { temp, config }
    }

    pub fn orchestrator(&self, source: Arc<FakeSource>) -> UpdateOrchestrator {
        self.orchestrator_with(source, FakeSystem::new(false))
    }

    pub fn orchestrator_with(
        &self,
        source: Arc<FakeSource>,
        system: Arc<FakeSystem>,
    ) -> UpdateOrchestrator {
        UpdateOrchestrator::new(Arc::new(self.config.clone()), source, system).unwrap()
    }

    pub fn installed_version(&self) -> String {
        fs::read_to_string(self.config.install_dir.join(VERSION_FILE))
            .unwrap()
            .trim()
            .to_string()
    }

    pub fn recorded_version(&self) -> Option<VersionRef> {
        StateStore::new(self.config.state_path())
            .load()
            .unwrap()
            .and_then(|s| s.current_version_ref)
    }

    pub fn log_entries(&self) -> Vec<LogEntry> {
        UpdateLog::new(self.config.log_path()).entries().unwrap()
    }

    /// Files in the state dir and backup dir, for "nothing was written" checks
    pub fn state_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = walkdir::WalkDir::new(&self.config.state_dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect();
        files.sort();
        files
    }
}

/// Repository whose initial branch is `main`
pub fn init_repo(path: &Path) -> Repository {
    let mut opts = RepositoryInitOptions::new();
    opts.initial_head("main");
    Repository::init_opts(path, &opts).unwrap()
}

/// Write `name` in the work tree and commit it on HEAD
pub fn commit_file(repo: &Repository, name: &str, content: &str, message: &str) -> Oid {
    let workdir = repo.workdir().unwrap().to_path_buf();
    let path = workdir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();

    let mut index = repo.index().unwrap();
    index.add_path(Path::new(name)).unwrap();
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();

    let sig = Signature::now("Test", "test@example.com").unwrap();
    let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
    let parents: Vec<&Commit> = parent.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
        .unwrap()
}

/// Clone `upstream` (a local path) into `dest`; the remote is `origin`
pub fn clone_repo(upstream: &Path, dest: &Path) -> Repository {
    Repository::clone(upstream.to_str().unwrap(), dest).unwrap()
}
