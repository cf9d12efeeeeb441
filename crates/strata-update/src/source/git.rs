//! git2-backed source control

use super::SourceControl;
use crate::cancel::CancelFlag;
use crate::error::{Result, UpdateError};
use git2::build::CheckoutBuilder;
use git2::{
    Direction, ErrorCode, FetchOptions, Oid, RemoteCallbacks, Repository, ResetType, Signature,
    StashFlags, StatusOptions,
};
use std::path::Path;
use strata_core::VersionRef;
use tracing::{debug, info};

/// Tracks one branch of one remote
#[derive(Debug, Clone)]
pub struct GitSource {
    remote: String,
    branch: String,
}

impl GitSource {
    pub fn new(remote: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            remote: remote.into(),
            branch: branch.into(),
        }
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    fn branch_ref(&self) -> String {
        format!("refs/heads/{}", self.branch)
    }

    fn tracking_ref(&self) -> String {
        format!("refs/remotes/{}/{}", self.remote, self.branch)
    }

    fn open(&self, path: &Path) -> Result<Repository> {
        Repository::open(path).map_err(|e| {
            UpdateError::source(format!(
                "{} is not a git repository: {}",
                path.display(),
                e.message()
            ))
        })
    }
}

fn git_error(context: &str, e: git2::Error) -> UpdateError {
    UpdateError::source(format!("{}: {}", context, e.message()))
}

/// Map a transfer error, preferring cancellation when it was requested
fn transfer_error(cancel: &CancelFlag, context: &str, e: git2::Error) -> UpdateError {
    if cancel.is_cancelled() {
        UpdateError::Cancelled
    } else {
        UpdateError::network(format!("{}: {}", context, e.message()))
    }
}

impl SourceControl for GitSource {
    fn local_head(&self, install_path: &Path) -> Result<Option<VersionRef>> {
        let repo = match Repository::open(install_path) {
            Ok(repo) => repo,
            Err(e) => {
                debug!("No git repository at {}: {}", install_path.display(), e.message());
                return Ok(None);
            }
        };

        let head = match repo.head() {
            Ok(head) => head,
            Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => {
                return Ok(None)
            }
            Err(e) => return Err(git_error("reading HEAD", e)),
        };
        let commit = head
            .peel_to_commit()
            .map_err(|e| git_error("resolving HEAD", e))?;
        Ok(Some(VersionRef::new(commit.id().to_string())))
    }

    fn remote_head(&self, install_path: &Path, cancel: &CancelFlag) -> Result<VersionRef> {
        let repo = self.open(install_path)?;
        let mut remote = repo
            .find_remote(&self.remote)
            .map_err(|e| git_error(&format!("remote '{}'", self.remote), e))?;

        let mut callbacks = RemoteCallbacks::new();
        let flag = cancel.clone();
        callbacks.sideband_progress(move |_| !flag.is_cancelled());

        let connection = remote
            .connect_auth(Direction::Fetch, Some(callbacks), None)
            .map_err(|e| transfer_error(cancel, &format!("connecting to '{}'", self.remote), e))?;
        let heads = connection
            .list()
            .map_err(|e| transfer_error(cancel, "listing remote refs", e))?;

        let wanted = self.branch_ref();
        heads
            .iter()
            .find(|head| head.name() == wanted)
            .map(|head| VersionRef::new(head.oid().to_string()))
            .ok_or_else(|| {
                UpdateError::source(format!(
                    "remote '{}' has no branch '{}'",
                    self.remote, self.branch
                ))
            })
    }

    fn has_local_changes(&self, install_path: &Path) -> Result<bool> {
        let repo = self.open(install_path)?;
        let mut options = StatusOptions::new();
        options
            .include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);
        let statuses = repo
            .statuses(Some(&mut options))
            .map_err(|e| git_error("reading work tree status", e))?;
        Ok(!statuses.is_empty())
    }

    fn shelve(&self, install_path: &Path, label: &str) -> Result<()> {
        let mut repo = self.open(install_path)?;
        let signature = repo
            .signature()
            .or_else(|_| Signature::now("strata", "strata@localhost"))
            .map_err(|e| git_error("building stash signature", e))?;
        let oid = repo
            .stash_save(&signature, label, Some(StashFlags::INCLUDE_UNTRACKED))
            .map_err(|e| git_error("stashing local changes", e))?;
        info!("Shelved local changes as '{}' ({})", label, oid);
        Ok(())
    }

    fn fetch(&self, install_path: &Path, cancel: &CancelFlag) -> Result<VersionRef> {
        let repo = self.open(install_path)?;
        let mut remote = repo
            .find_remote(&self.remote)
            .map_err(|e| git_error(&format!("remote '{}'", self.remote), e))?;

        let mut callbacks = RemoteCallbacks::new();
        let flag = cancel.clone();
        callbacks.transfer_progress(move |_| !flag.is_cancelled());
        let flag = cancel.clone();
        callbacks.sideband_progress(move |_| !flag.is_cancelled());
        let mut options = FetchOptions::new();
        options.remote_callbacks(callbacks);

        let refspec = format!("+{}:{}", self.branch_ref(), self.tracking_ref());
        debug!("Fetching {} from {}", refspec, self.remote);
        remote
            .fetch(&[refspec.as_str()], Some(&mut options), None)
            .map_err(|e| transfer_error(cancel, &format!("fetching from '{}'", self.remote), e))?;

        let fetched = repo
            .find_reference(&self.tracking_ref())
            .and_then(|r| r.peel_to_commit())
            .map_err(|e| git_error("resolving fetched branch", e))?;
        Ok(VersionRef::new(fetched.id().to_string()))
    }

    fn hard_sync(&self, install_path: &Path, target: &VersionRef) -> Result<()> {
        let repo = self.open(install_path)?;
        let oid = Oid::from_str(target.as_str())
            .map_err(|e| git_error(&format!("'{}' is not a commit id", target), e))?;
        let commit = repo
            .find_commit(oid)
            .map_err(|e| git_error(&format!("commit {} not found", target.short()), e))?;

        let branch_ref = self.branch_ref();
        let on_branch = repo
            .head()
            .ok()
            .and_then(|head| head.name().map(|name| name == branch_ref))
            .unwrap_or(false);
        if !on_branch {
            repo.branch(&self.branch, &commit, true)
                .map_err(|e| git_error(&format!("moving branch '{}'", self.branch), e))?;
            repo.set_head(&branch_ref)
                .map_err(|e| git_error(&format!("checking out '{}'", self.branch), e))?;
        }

        let mut checkout = CheckoutBuilder::new();
        checkout.force();
        repo.reset(commit.as_object(), ResetType::Hard, Some(&mut checkout))
            .map_err(|e| git_error("resetting work tree", e))?;

        info!("Work tree synced to {}", target.short());
        Ok(())
    }
}
