//! Fake collaborators
//!
//! `FakeSource` models an install tree whose checked-out version is the
//! content of its `VERSION` file; a `LOCAL_CHANGE` file stands for an
//! uncommitted modification.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use strata_core::VersionRef;
use strata_update::{
    ApplyPhase, CancelFlag, HookContext, PostUpdateHook, Result, SourceControl, SystemManager,
    UpdateError,
};
use tokio::sync::Notify;

pub const VERSION_FILE: &str = "VERSION";
pub const LOCAL_CHANGE_FILE: &str = "LOCAL_CHANGE";

pub struct FakeSource {
    remote: Mutex<VersionRef>,
    remote_reachable: AtomicBool,
    fetch_fails: AtomicBool,
    shelved: Mutex<Vec<String>>,
    fetches: Mutex<usize>,
    sync_delay: Mutex<Option<Duration>>,
}

impl FakeSource {
    pub fn new(remote: &str) -> Arc<Self> {
        Arc::new(Self {
            remote: Mutex::new(VersionRef::from(remote)),
            remote_reachable: AtomicBool::new(true),
            fetch_fails: AtomicBool::new(false),
            shelved: Mutex::new(Vec::new()),
            fetches: Mutex::new(0),
            sync_delay: Mutex::new(None),
        })
    }

    pub fn set_remote(&self, version: &str) {
        *self.remote.lock().unwrap() = VersionRef::from(version);
    }

    /// Version queries fail with `NetworkUnavailable`
    pub fn set_unreachable(&self) {
        self.remote_reachable.store(false, Ordering::SeqCst);
    }

    /// Version queries succeed but the fetch fails
    pub fn fail_fetch(&self) {
        self.fetch_fails.store(true, Ordering::SeqCst);
    }

    /// `hard_sync` sleeps this long before touching the tree
    pub fn set_sync_delay(&self, delay: Duration) {
        *self.sync_delay.lock().unwrap() = Some(delay);
    }

    pub fn shelved(&self) -> Vec<String> {
        self.shelved.lock().unwrap().clone()
    }

    pub fn fetch_count(&self) -> usize {
        *self.fetches.lock().unwrap()
    }
}

impl SourceControl for FakeSource {
    fn local_head(&self, install_path: &Path) -> Result<Option<VersionRef>> {
        Ok(fs::read_to_string(install_path.join(VERSION_FILE))
            .ok()
            .map(|v| VersionRef::new(v.trim())))
    }

    fn remote_head(&self, _install_path: &Path, _cancel: &CancelFlag) -> Result<VersionRef> {
        if !self.remote_reachable.load(Ordering::SeqCst) {
            return Err(UpdateError::network("connection refused"));
        }
        Ok(self.remote.lock().unwrap().clone())
    }

    fn has_local_changes(&self, install_path: &Path) -> Result<bool> {
        Ok(install_path.join(LOCAL_CHANGE_FILE).exists())
    }

    fn shelve(&self, install_path: &Path, label: &str) -> Result<()> {
        fs::remove_file(install_path.join(LOCAL_CHANGE_FILE))?;
        self.shelved.lock().unwrap().push(label.to_string());
        Ok(())
    }

    fn fetch(&self, _install_path: &Path, _cancel: &CancelFlag) -> Result<VersionRef> {
        *self.fetches.lock().unwrap() += 1;
        if self.fetch_fails.load(Ordering::SeqCst) {
            return Err(UpdateError::network("connection reset by peer"));
        }
        Ok(self.remote.lock().unwrap().clone())
    }

    fn hard_sync(&self, install_path: &Path, target: &VersionRef) -> Result<()> {
        let delay = *self.sync_delay.lock().unwrap();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        fs::write(install_path.join(VERSION_FILE), format!("{}\n", target))?;
        fs::create_dir_all(install_path.join("scripts"))?;
        fs::write(
            install_path.join("scripts/setup.sh"),
            format!("#!/bin/sh\necho {}\n", target),
        )?;
        Ok(())
    }
}

/// System manager that records what it was asked to do
pub struct FakeSystem {
    available: bool,
    next_elapse: Option<DateTime<Utc>>,
    calls: Mutex<Vec<String>>,
}

impl FakeSystem {
    pub fn new(available: bool) -> Arc<Self> {
        Arc::new(Self {
            available,
            next_elapse: None,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn with_next_elapse(next: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            available: true,
            next_elapse: Some(next),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl SystemManager for FakeSystem {
    fn is_available(&self) -> bool {
        self.available
    }

    async fn daemon_reload(&self) -> Result<()> {
        self.record("daemon-reload".to_string());
        Ok(())
    }

    async fn enable_timer(&self, unit: &str) -> Result<()> {
        self.record(format!("enable {}", unit));
        Ok(())
    }

    async fn disable_timer(&self, unit: &str) -> Result<()> {
        self.record(format!("disable {}", unit));
        Ok(())
    }

    async fn next_elapse(&self, unit: &str) -> Result<Option<DateTime<Utc>>> {
        self.record(format!("next-elapse {}", unit));
        Ok(self.next_elapse)
    }
}

/// Hook that always fails
pub struct FailingHook;

#[async_trait]
impl PostUpdateHook for FailingHook {
    fn name(&self) -> &str {
        "failing"
    }

    async fn run(&self, _ctx: &HookContext<'_>) -> Result<()> {
        Err(UpdateError::apply_failed(
            ApplyPhase::Hooks,
            "failing: configuration rejected",
        ))
    }
}

/// Hook that swaps the install dir for a plain file, then fails, so the
/// automatic rollback cannot remove the tree it has to replace
pub struct ClobberInstallHook;

#[async_trait]
impl PostUpdateHook for ClobberInstallHook {
    fn name(&self) -> &str {
        "clobber"
    }

    async fn run(&self, ctx: &HookContext<'_>) -> Result<()> {
        fs::remove_dir_all(ctx.install_dir)?;
        fs::write(ctx.install_dir, "not a directory")?;
        Err(UpdateError::apply_failed(
            ApplyPhase::Hooks,
            "clobber: install tree replaced",
        ))
    }
}

/// Hook that signals `entered` and then waits for `release`
pub struct BlockingHook {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl BlockingHook {
    pub fn new() -> Self {
        Self {
            entered: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        }
    }
}

#[async_trait]
impl PostUpdateHook for BlockingHook {
    fn name(&self) -> &str {
        "blocking"
    }

    async fn run(&self, _ctx: &HookContext<'_>) -> Result<()> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(())
    }
}
