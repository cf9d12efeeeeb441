//! Single-instance update lock
//!
//! The lock is a file holding the owner's pid. It is published with a hard
//! link from a fully written temp file, so it is created exclusively and is
//! never observed half-written. A lock whose pid is not a live process is
//! stale and is reclaimed once.

use crate::error::{Result, UpdateError};
use chrono::{DateTime, Utc};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct LockManager {
    path: PathBuf,
}

impl LockManager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the lock for this process, or fail with `LockHeld`.
    pub fn acquire(&self) -> Result<LockHandle> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let pid = std::process::id();
        let mut reclaimed = false;
        loop {
            let acquired_at = Utc::now();
            match self.publish(pid, acquired_at) {
                Ok(()) => {
                    debug!("Acquired update lock {}", self.path.display());
                    return Ok(LockHandle {
                        path: self.path.clone(),
                        owner_pid: pid,
                        acquired_at,
                        released: false,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e.into()),
            }

            let owner = read_owner(&self.path);
            match owner {
                Some(owner) if process_alive(owner) => {
                    return Err(UpdateError::LockHeld {
                        path: self.path.clone(),
                        pid: owner,
                    })
                }
                _ if reclaimed => {
                    // Someone else reclaimed it first
                    return Err(UpdateError::LockHeld {
                        path: self.path.clone(),
                        pid: owner.unwrap_or(0),
                    });
                }
                _ => {
                    match owner {
                        Some(owner) => warn!(
                            "Removing stale update lock {} (pid {} is not running)",
                            self.path.display(),
                            owner
                        ),
                        None => warn!(
                            "Removing unreadable update lock {}",
                            self.path.display()
                        ),
                    }
                    remove_if_exists(&self.path)?;
                    reclaimed = true;
                }
            }
        }
    }

    /// Pid recorded in the lock file, if it names a live process
    pub fn holder(&self) -> Option<u32> {
        read_owner(&self.path).filter(|pid| process_alive(*pid))
    }

    /// Write the lock content to a temp file and link it into place
    fn publish(&self, pid: u32, acquired_at: DateTime<Utc>) -> io::Result<()> {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "update.lock".to_string());
        let temp = self.path.with_file_name(format!(
            ".{}.{}.{}",
            file_name,
            pid,
            acquired_at.timestamp_nanos_opt().unwrap_or_default()
        ));

        let result = (|| {
            let mut file = fs::File::create(&temp)?;
            writeln!(file, "{}", pid)?;
            writeln!(file, "{}", acquired_at.to_rfc3339())?;
            file.sync_all()?;
            fs::hard_link(&temp, &self.path)
        })();

        if let Err(e) = fs::remove_file(&temp) {
            debug!("Could not remove {}: {}", temp.display(), e);
        }
        result
    }
}

/// Proof of holding the update lock; releases on drop
#[derive(Debug)]
pub struct LockHandle {
    path: PathBuf,
    owner_pid: u32,
    acquired_at: DateTime<Utc>,
    released: bool,
}

impl LockHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn owner_pid(&self) -> u32 {
        self.owner_pid
    }

    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    /// Delete the lock file if it still records our pid
    pub fn release(mut self) -> Result<()> {
        self.release_inner()?;
        Ok(())
    }

    fn release_inner(&mut self) -> io::Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        match read_owner(&self.path) {
            Some(pid) if pid == self.owner_pid => {
                remove_if_exists(&self.path)?;
                debug!("Released update lock {}", self.path.display());
            }
            Some(pid) => warn!(
                "Update lock {} now belongs to pid {}, leaving it",
                self.path.display(),
                pid
            ),
            None => debug!("Update lock {} already gone", self.path.display()),
        }
        Ok(())
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if let Err(e) = self.release_inner() {
            warn!("Failed to release update lock {}: {}", self.path.display(), e);
        }
    }
}

/// First line of the lock file as a pid
fn read_owner(path: &Path) -> Option<u32> {
    let content = fs::read_to_string(path).ok()?;
    content.lines().next()?.trim().parse().ok()
}

/// Whether `pid` names a running process (EPERM means it exists)
pub fn process_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
