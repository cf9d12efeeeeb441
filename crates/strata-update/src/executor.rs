//! Applying a fetched update to the install tree
//!
//! Phases, in order:
//! 1. shelve local modifications (never re-applied automatically)
//! 2. fetch the tracked branch
//! 3. hard-sync the work tree to it
//! 4. restore executable bits
//! 5. post-update hooks
//! 6. record the new version in the installation state
//!
//! Any failure aborts with `ApplyFailed` before step 6, so the recorded
//! state only ever names a version whose hooks all passed.

use crate::cancel::{run_blocking, CancelFlag};
use crate::error::{ApplyPhase, Result, UpdateError};
use crate::hooks::{HookContext, PostUpdateHook};
use crate::source::{shelf_label, SourceControl};
use chrono::Utc;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use strata_core::{StateStore, VersionRef};
use tracing::{debug, info, warn};

/// What an apply did
#[derive(Debug, Clone)]
pub struct ApplyReport {
    pub version: VersionRef,
    /// Label of the shelf holding local modifications, if any were found
    pub shelved: Option<String>,
    /// Files whose mode was changed to 0755
    pub permissions_fixed: usize,
}

pub struct UpdateExecutor {
    source: Arc<dyn SourceControl>,
    state: StateStore,
    executables: GlobSet,
    hooks: Vec<Arc<dyn PostUpdateHook>>,
    network_timeout: Duration,
}

impl UpdateExecutor {
    pub fn new(
        source: Arc<dyn SourceControl>,
        state: StateStore,
        executable_globs: &[String],
        network_timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            source,
            state,
            executables: build_globset(executable_globs)?,
            hooks: Vec::new(),
            network_timeout,
        })
    }

    /// Replace the post-update hooks
    pub fn with_hooks(mut self, hooks: Vec<Arc<dyn PostUpdateHook>>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Bring `install_path` to the remote head.
    pub async fn apply(
        &self,
        install_path: &Path,
        config_dir: &Path,
        cancel: &CancelFlag,
    ) -> Result<ApplyReport> {
        let shelved = self.shelve(install_path, cancel).await?;

        info!("Fetching update");
        let source = Arc::clone(&self.source);
        let path = install_path.to_path_buf();
        let target = run_blocking(cancel, Some(self.network_timeout), "fetch", move |flag| {
            source.fetch(&path, &flag)
        })
        .await
        .map_err(|e| phase_error(ApplyPhase::Fetch, e))?;

        info!("Syncing work tree to {}", target.short());
        let source = Arc::clone(&self.source);
        let path = install_path.to_path_buf();
        let sync_target = target.clone();
        run_blocking(cancel, None, "sync", move |_| {
            source.hard_sync(&path, &sync_target)
        })
        .await
        .map_err(|e| phase_error(ApplyPhase::Sync, e))?;

        let executables = self.executables.clone();
        let path = install_path.to_path_buf();
        let permissions_fixed = run_blocking(cancel, None, "permissions", move |_| {
            restore_executable_bits(&path, &executables)
                .map_err(|e| UpdateError::apply_failed(ApplyPhase::Permissions, e.to_string()))
        })
        .await
        .map_err(|e| phase_error(ApplyPhase::Permissions, e))?;
        if permissions_fixed > 0 {
            debug!("Restored executable bit on {} files", permissions_fixed);
        }

        let ctx = HookContext {
            install_dir: install_path,
            config_dir,
            version: &target,
        };
        for hook in &self.hooks {
            if cancel.is_cancelled() {
                return Err(UpdateError::Cancelled);
            }
            info!("Running post-update hook: {}", hook.name());
            hook.run(&ctx)
                .await
                .map_err(|e| phase_error(ApplyPhase::Hooks, e))?;
        }

        let version = target.clone();
        self.state
            .update(|state| state.record_update(version))
            .map_err(|e| UpdateError::apply_failed(ApplyPhase::Persist, e.to_string()))?;
        info!("Installation updated to {}", target);

        Ok(ApplyReport {
            version: target,
            shelved,
            permissions_fixed,
        })
    }

    async fn shelve(&self, install_path: &Path, cancel: &CancelFlag) -> Result<Option<String>> {
        let source = Arc::clone(&self.source);
        let path = install_path.to_path_buf();
        let label = shelf_label(Utc::now());
        let shelved = run_blocking(cancel, None, "shelve", move |_| {
            if !source.has_local_changes(&path)? {
                return Ok(None);
            }
            source.shelve(&path, &label)?;
            Ok(Some(label))
        })
        .await
        .map_err(|e| phase_error(ApplyPhase::Shelve, e))?;

        if let Some(label) = &shelved {
            warn!(
                "Local modifications in {} were shelved as '{}' and will not be re-applied; \
                 use `git stash list` there to recover them",
                install_path.display(),
                label
            );
        }
        Ok(shelved)
    }
}

/// Wrap an error as `ApplyFailed` for `phase`, keeping cancellation and
/// errors that already name a phase
fn phase_error(phase: ApplyPhase, err: UpdateError) -> UpdateError {
    match err {
        UpdateError::Cancelled | UpdateError::ApplyFailed { .. } => err,
        other => UpdateError::apply_failed(phase, other.to_string()),
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| {
                UpdateError::Config(strata_core::Error::invalid_config(format!(
                    "Invalid executable glob {:?}: {}",
                    pattern, e
                )))
            })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| {
        UpdateError::Config(strata_core::Error::invalid_config(format!(
            "Invalid executable globs: {}",
            e
        )))
    })
}

/// Set mode 0755 on regular files matching `executables`; returns the count changed
#[cfg(unix)]
fn restore_executable_bits(root: &Path, executables: &GlobSet) -> std::io::Result<usize> {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use walkdir::WalkDir;

    let mut changed = 0;
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git");
    for entry in walker {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        if !executables.is_match(rel) {
            continue;
        }

        let mode = entry.metadata().map_err(std::io::Error::from)?.permissions().mode();
        if mode & 0o777 != 0o755 {
            fs::set_permissions(entry.path(), fs::Permissions::from_mode(0o755))?;
            changed += 1;
        }
    }
    Ok(changed)
}

#[cfg(not(unix))]
fn restore_executable_bits(_root: &Path, _executables: &GlobSet) -> std::io::Result<usize> {
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn globs(patterns: &[&str]) -> GlobSet {
        build_globset(&patterns.iter().map(|p| p.to_string()).collect::<Vec<_>>()).unwrap()
    }

    #[test]
    fn test_glob_matching() {
        let set = globs(&["**/*.sh", "bin/*"]);
        assert!(set.is_match("install.sh"));
        assert!(set.is_match("scripts/deep/run.sh"));
        assert!(set.is_match("bin/strata-tool"));
        assert!(!set.is_match("bin/sub/tool"));
        assert!(!set.is_match("README.md"));
    }

    #[test]
    fn test_invalid_glob() {
        let result = build_globset(&["[".to_string()]);
        assert!(matches!(result, Err(UpdateError::Config(_))));
    }

    #[test]
    fn test_phase_error_keeps_cancellation() {
        let err = phase_error(ApplyPhase::Fetch, UpdateError::Cancelled);
        assert!(matches!(err, UpdateError::Cancelled));

        let err = phase_error(ApplyPhase::Fetch, UpdateError::network("reset"));
        match err {
            UpdateError::ApplyFailed { phase, message, .. } => {
                assert_eq!(phase, ApplyPhase::Fetch);
                assert!(message.contains("reset"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_restore_executable_bits() {
        use std::fs;
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("scripts")).unwrap();
        fs::create_dir_all(root.join("bin")).unwrap();
        fs::create_dir_all(root.join(".git/hooks")).unwrap();
        for file in ["scripts/run.sh", "bin/tool", "README.md", ".git/hooks/x.sh"] {
            fs::write(root.join(file), "x").unwrap();
            fs::set_permissions(root.join(file), fs::Permissions::from_mode(0o644)).unwrap();
        }

        let changed = restore_executable_bits(root, &globs(&["**/*.sh", "bin/*"])).unwrap();
        assert_eq!(changed, 2);

        let mode = |p: &str| fs::metadata(root.join(p)).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode("scripts/run.sh"), 0o755);
        assert_eq!(mode("bin/tool"), 0o755);
        assert_eq!(mode("README.md"), 0o644);
        assert_eq!(mode(".git/hooks/x.sh"), 0o644);

        // Second pass changes nothing
        assert_eq!(
            restore_executable_bits(root, &globs(&["**/*.sh", "bin/*"])).unwrap(),
            0
        );
    }
}
