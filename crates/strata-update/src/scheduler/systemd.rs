//! systemd access through `systemctl`

use crate::error::{Result, UpdateError};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

const SYSTEMD_RUNTIME_DIR: &str = "/run/systemd/system";

/// The OS service manager, as far as the updater needs it
#[async_trait]
pub trait SystemManager: Send + Sync {
    /// Whether the service manager is running on this host
    fn is_available(&self) -> bool;

    /// Re-read unit definitions
    async fn daemon_reload(&self) -> Result<()>;

    /// Enable and start a timer unit
    async fn enable_timer(&self, unit: &str) -> Result<()>;

    /// Stop and disable a timer unit
    async fn disable_timer(&self, unit: &str) -> Result<()>;

    /// Next time the timer fires, if known
    async fn next_elapse(&self, unit: &str) -> Result<Option<DateTime<Utc>>>;
}

/// `systemctl`-backed system manager
#[derive(Debug, Clone)]
pub struct Systemctl {
    program: PathBuf,
    user: bool,
}

impl Default for Systemctl {
    fn default() -> Self {
        Self {
            program: PathBuf::from("systemctl"),
            user: false,
        }
    }
}

impl Systemctl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Talk to the per-user manager (`systemctl --user`)
    pub fn user() -> Self {
        Self {
            user: true,
            ..Self::default()
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new(&self.program);
        if self.user {
            cmd.arg("--user");
        }
        cmd.args(args);
        debug!("Running systemctl {}", args.join(" "));

        let output = cmd
            .output()
            .await
            .map_err(|e| UpdateError::schedule(format!("cannot run systemctl: {}", e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(UpdateError::schedule(format!(
                "systemctl {} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl SystemManager for Systemctl {
    fn is_available(&self) -> bool {
        which::which(&self.program).is_ok() && Path::new(SYSTEMD_RUNTIME_DIR).is_dir()
    }

    async fn daemon_reload(&self) -> Result<()> {
        self.run(&["daemon-reload"]).await.map(drop)
    }

    async fn enable_timer(&self, unit: &str) -> Result<()> {
        self.run(&["enable", "--now", unit]).await.map(drop)
    }

    async fn disable_timer(&self, unit: &str) -> Result<()> {
        self.run(&["disable", "--now", unit]).await.map(drop)
    }

    async fn next_elapse(&self, unit: &str) -> Result<Option<DateTime<Utc>>> {
        let value = self
            .run(&[
                "show",
                unit,
                "--property=NextElapseUSecRealtime",
                "--value",
                "--timestamp=unix",
            ])
            .await?;
        Ok(parse_elapse(&value))
    }
}

/// Parse a `NextElapseUSecRealtime` value: `@<secs>` or raw microseconds
pub fn parse_elapse(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() || value == "n/a" || value == "0" {
        return None;
    }
    if let Some(secs) = value.strip_prefix('@') {
        let secs: i64 = secs.parse().ok()?;
        return Utc.timestamp_opt(secs, 0).single();
    }
    if value.bytes().all(|b| b.is_ascii_digit()) {
        let usecs: i64 = value.parse().ok()?;
        return DateTime::from_timestamp_micros(usecs);
    }
    debug!("Unrecognised elapse value: {}", value);
    None
}
