//! Periodic update trigger
//!
//! A schedule is persisted as a systemd timer plus a oneshot service that
//! runs `strata apply --non-interactive --yes`. The timer file is the only
//! record of the schedule; [`Scheduler::current`] reads it back.

mod systemd;

pub use systemd::{parse_elapse, SystemManager, Systemctl};

use crate::error::{Result, UpdateError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use strata_core::{atomic_write, ScheduleSettings, StateStore};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Custom,
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Custom => "custom",
        };
        f.write_str(s)
    }
}

/// When unattended updates run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ScheduleConfig {
    pub frequency: Frequency,
    /// `OnCalendar` expression, only for `Custom`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    pub randomized_delay_secs: u64,
    pub enabled: bool,
}

impl ScheduleConfig {
    pub fn new(frequency: Frequency, randomized_delay_secs: u64) -> Self {
        Self {
            frequency,
            expression: None,
            randomized_delay_secs,
            enabled: true,
        }
    }

    pub fn custom(expression: impl Into<String>, randomized_delay_secs: u64) -> Self {
        Self {
            frequency: Frequency::Custom,
            expression: Some(expression.into()),
            randomized_delay_secs,
            enabled: true,
        }
    }

    /// The `OnCalendar` value for this schedule
    pub fn on_calendar(&self) -> Result<String> {
        match self.frequency {
            Frequency::Daily => Ok("daily".to_string()),
            Frequency::Weekly => Ok("weekly".to_string()),
            Frequency::Monthly => Ok("monthly".to_string()),
            Frequency::Custom => {
                let expr = self.expression.as_deref().unwrap_or_default().trim();
                if expr.is_empty() {
                    return Err(UpdateError::schedule("custom schedule needs an expression"));
                }
                if expr.contains(&['\n', '\r'][..]) {
                    return Err(UpdateError::schedule(
                        "custom schedule expression must be a single line",
                    ));
                }
                Ok(expr.to_string())
            }
        }
    }
}

/// What the `schedule` command asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleRequest {
    Set(Frequency, Option<String>),
    Disable,
}

impl FromStr for ScheduleRequest {
    type Err = UpdateError;

    /// `daily`, `weekly`, `monthly`, `custom=<expr>` or `disable`
    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "daily" => Ok(Self::Set(Frequency::Daily, None)),
            "weekly" => Ok(Self::Set(Frequency::Weekly, None)),
            "monthly" => Ok(Self::Set(Frequency::Monthly, None)),
            "disable" => Ok(Self::Disable),
            other => match other.strip_prefix("custom=") {
                Some(expr) => Ok(Self::Set(Frequency::Custom, Some(expr.to_string()))),
                None => Err(UpdateError::schedule(format!(
                    "unknown schedule '{}' (expected daily, weekly, monthly, custom=<expr> or disable)",
                    other
                ))),
            },
        }
    }
}

pub struct Scheduler {
    system: Arc<dyn SystemManager>,
    unit_dir: PathBuf,
    unit_name: String,
    binary: PathBuf,
    config_file: Option<PathBuf>,
    state: StateStore,
}

impl Scheduler {
    pub fn new(
        system: Arc<dyn SystemManager>,
        settings: &ScheduleSettings,
        binary: PathBuf,
        state: StateStore,
    ) -> Self {
        Self {
            system,
            unit_dir: settings.unit_dir.clone(),
            unit_name: settings.unit_name.clone(),
            binary,
            config_file: None,
            state,
        }
    }

    /// Pass `--config <path>` to the scheduled run
    pub fn with_config_file(mut self, path: Option<PathBuf>) -> Self {
        self.config_file = path;
        self
    }

    pub fn timer_unit(&self) -> String {
        format!("{}.timer", self.unit_name)
    }

    pub fn service_unit(&self) -> String {
        format!("{}.service", self.unit_name)
    }

    pub fn timer_path(&self) -> PathBuf {
        self.unit_dir.join(self.timer_unit())
    }

    pub fn service_path(&self) -> PathBuf {
        self.unit_dir.join(self.service_unit())
    }

    /// Install (or replace) the timer and service, then enable the timer
    pub async fn set_schedule(&self, config: &ScheduleConfig) -> Result<()> {
        if !config.enabled {
            return self.disable_schedule().await;
        }
        let on_calendar = config.on_calendar()?;

        fs::create_dir_all(&self.unit_dir).map_err(|e| {
            UpdateError::schedule(format!("cannot create {}: {}", self.unit_dir.display(), e))
        })?;
        self.write_unit(&self.service_path(), &self.render_service())?;
        self.write_unit(
            &self.timer_path(),
            &render_timer(&on_calendar, config.randomized_delay_secs),
        )?;

        if self.system.is_available() {
            self.system.daemon_reload().await?;
            self.system.enable_timer(&self.timer_unit()).await?;
        } else {
            warn!(
                "systemd is not running; unit files written to {} but not enabled",
                self.unit_dir.display()
            );
        }

        self.state.update(|s| s.auto_update_enabled = true)?;
        info!(
            "Scheduled updates: {} (jitter {}s)",
            on_calendar, config.randomized_delay_secs
        );
        Ok(())
    }

    /// Disable the timer and remove both unit files. Idempotent.
    pub async fn disable_schedule(&self) -> Result<()> {
        let timer = self.timer_path();
        let installed = timer.exists() || self.service_path().exists();

        if installed && self.system.is_available() {
            if let Err(e) = self.system.disable_timer(&self.timer_unit()).await {
                warn!("Could not disable {}: {}", self.timer_unit(), e);
            }
        }

        for path in [timer, self.service_path()] {
            match fs::remove_file(&path) {
                Ok(()) => debug!("Removed {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(UpdateError::schedule(format!(
                        "cannot remove {}: {}",
                        path.display(),
                        e
                    )))
                }
            }
        }

        if installed && self.system.is_available() {
            self.system.daemon_reload().await?;
        }

        self.state.update(|s| s.auto_update_enabled = false)?;
        if installed {
            info!("Scheduled updates disabled");
        }
        Ok(())
    }

    /// The installed schedule, read back from the timer unit
    pub fn current(&self) -> Result<Option<ScheduleConfig>> {
        let content = match fs::read_to_string(self.timer_path()) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(parse_timer(&content))
    }

    /// Next scheduled run, `None` when no timer is installed or it is unknown
    pub async fn next_run(&self) -> Option<DateTime<Utc>> {
        if !self.timer_path().exists() || !self.system.is_available() {
            return None;
        }
        match self.system.next_elapse(&self.timer_unit()).await {
            Ok(next) => next,
            Err(e) => {
                warn!("Could not query next run of {}: {}", self.timer_unit(), e);
                None
            }
        }
    }

    fn render_service(&self) -> String {
        let mut args = vec![self.binary.to_string_lossy().into_owned()];
        if let Some(config) = &self.config_file {
            args.push("--config".to_string());
            args.push(config.to_string_lossy().into_owned());
        }
        args.extend(["apply", "--non-interactive", "--yes"].map(String::from));
        let exec = args
            .iter()
            .map(|arg| quote_exec_arg(arg))
            .collect::<Vec<_>>()
            .join(" ");

        format!(
            "# Generated by strata schedule\n\
             [Unit]\n\
             Description=Strata automatic update\n\
             Wants=network-online.target\n\
             After=network-online.target\n\
             \n\
             [Service]\n\
             Type=oneshot\n\
             ExecStart={}\n",
            exec
        )
    }

    fn write_unit(&self, path: &Path, content: &str) -> Result<()> {
        atomic_write(path, content.as_bytes()).map_err(|e| {
            UpdateError::schedule(format!("cannot write {}: {}", path.display(), e))
        })?;
        debug!("Wrote {}", path.display());
        Ok(())
    }
}

fn render_timer(on_calendar: &str, delay_secs: u64) -> String {
    format!(
        "# Generated by strata schedule\n\
         [Unit]\n\
         Description=Strata periodic update check\n\
         \n\
         [Timer]\n\
         OnCalendar={}\n\
         RandomizedDelaySec={}\n\
         Persistent=true\n\
         \n\
         [Install]\n\
         WantedBy=timers.target\n",
        on_calendar, delay_secs
    )
}

/// Quote one `ExecStart=` word. `%` and `$` are escaped everywhere; words
/// with whitespace, quotes, backslashes or `;` are double-quoted.
fn quote_exec_arg(arg: &str) -> String {
    let escaped = arg.replace('%', "%%").replace('$', "$$");
    let plain = !escaped.is_empty()
        && !escaped
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '\'' | '\\' | ';'));
    if plain {
        return escaped;
    }

    let mut quoted = String::with_capacity(escaped.len() + 2);
    quoted.push('"');
    for c in escaped.chars() {
        match c {
            '"' | '\\' => {
                quoted.push('\\');
                quoted.push(c);
            }
            '\n' => quoted.push_str("\\n"),
            '\t' => quoted.push_str("\\t"),
            _ => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

/// Recover a ScheduleConfig from a timer unit we generated
fn parse_timer(content: &str) -> Option<ScheduleConfig> {
    let mut on_calendar = None;
    let mut delay = 0;
    for line in content.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        match key.trim() {
            "OnCalendar" => on_calendar = Some(value.trim().to_string()),
            "RandomizedDelaySec" => delay = value.trim().parse().unwrap_or(0),
            _ => {}
        }
    }

    let on_calendar = on_calendar?;
    let config = match on_calendar.as_str() {
        "daily" => ScheduleConfig::new(Frequency::Daily, delay),
        "weekly" => ScheduleConfig::new(Frequency::Weekly, delay),
        "monthly" => ScheduleConfig::new(Frequency::Monthly, delay),
        _ => ScheduleConfig::custom(on_calendar, delay),
    };
    Some(config)
}
