//! Updater configuration types
//!
//! One `UpdaterConfig` is built at startup and shared read-only by every
//! component of the updater.

use crate::utils::get_home_dir;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const LOCK_FILE: &str = "update.lock";
const STATE_FILE: &str = "installation.json";
const LOG_FILE: &str = "update.log";
const BACKUPS_DIR: &str = "backups";

/// Complete updater configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UpdaterConfig {
    /// Root of the installed toolkit (a git working tree)
    #[serde(default = "default_install_dir")]
    pub install_dir: PathBuf,

    /// Directory holding the toolkit's generated configuration
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,

    /// Directory for the lock file, installation state, update log and backups
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Name of the git remote updates are pulled from
    #[serde(default = "default_remote")]
    pub remote: String,

    /// Branch on the remote that is tracked
    #[serde(default = "default_branch")]
    pub branch: String,

    /// Upper bound for any single network operation, in seconds
    #[serde(default = "default_network_timeout")]
    pub network_timeout_secs: u64,

    /// Files (relative to the install dir) that must stay executable after an update
    #[serde(default = "default_executable_globs")]
    pub executable_globs: Vec<String>,

    /// Backup and retention settings
    #[serde(default)]
    pub backup: BackupSettings,

    /// Post-update hook settings
    #[serde(default)]
    pub hooks: HookSettings,

    /// Periodic update trigger settings
    #[serde(default)]
    pub schedule: ScheduleSettings,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            install_dir: default_install_dir(),
            config_dir: default_config_dir(),
            state_dir: default_state_dir(),
            remote: default_remote(),
            branch: default_branch(),
            network_timeout_secs: default_network_timeout(),
            executable_globs: default_executable_globs(),
            backup: BackupSettings::default(),
            hooks: HookSettings::default(),
            schedule: ScheduleSettings::default(),
        }
    }
}

impl UpdaterConfig {
    /// Path of the single-instance lock file
    pub fn lock_path(&self) -> PathBuf {
        self.state_dir.join(LOCK_FILE)
    }

    /// Path of the persisted installation state
    pub fn state_path(&self) -> PathBuf {
        self.state_dir.join(STATE_FILE)
    }

    /// Path of the append-only update log
    pub fn log_path(&self) -> PathBuf {
        self.state_dir.join(LOG_FILE)
    }

    /// Directory holding backup archives and their metadata
    pub fn backup_dir(&self) -> PathBuf {
        self.backup
            .dir
            .clone()
            .unwrap_or_else(|| self.state_dir.join(BACKUPS_DIR))
    }

    /// Configuration directory, if it should be included in backups
    pub fn backup_config_dir(&self) -> Option<PathBuf> {
        self.backup.include_config.then(|| self.config_dir.clone())
    }
}

/// Backup and retention settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BackupSettings {
    /// Number of most recent backups to keep
    #[serde(default = "default_keep")]
    pub keep: usize,

    /// Also archive the configuration directory
    #[serde(default = "default_true")]
    pub include_config: bool,

    /// Gzip compression level (1-9)
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,

    /// Override for the backup directory (defaults to `<state-dir>/backups`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            keep: default_keep(),
            include_config: true,
            compression_level: default_compression_level(),
            dir: None,
        }
    }
}

/// Post-update hook settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HookSettings {
    /// Command validating the configuration directory (argv form).
    /// When unset, YAML and JSON files in the config dir are parsed instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validate_command: Option<Vec<String>>,

    /// Tools that must be on PATH after every update
    #[serde(default)]
    pub required_tools: Vec<String>,

    /// Manifest inside the install tree listing further required tools
    #[serde(default = "default_tools_manifest")]
    pub tools_manifest: Option<PathBuf>,

    /// Command installing missing tools (argv form); missing tools are fatal without it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_command: Option<Vec<String>>,

    /// Reload scheduled service definitions after an update
    #[serde(default = "default_true")]
    pub reload_services: bool,

    /// Upper bound for each hook command, in seconds
    #[serde(default = "default_hook_timeout")]
    pub timeout_secs: u64,
}

impl Default for HookSettings {
    fn default() -> Self {
        Self {
            validate_command: None,
            required_tools: Vec::new(),
            tools_manifest: default_tools_manifest(),
            install_command: None,
            reload_services: true,
            timeout_secs: default_hook_timeout(),
        }
    }
}

/// Periodic update trigger settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ScheduleSettings {
    /// Base name of the generated timer/service units
    #[serde(default = "default_unit_name")]
    pub unit_name: String,

    /// Directory the unit files are written to
    #[serde(default = "default_unit_dir")]
    pub unit_dir: PathBuf,

    /// Jitter applied when the caller does not pass one, in seconds
    #[serde(default = "default_delay")]
    pub default_delay_secs: u64,

    /// Binary invoked by the service unit (defaults to the running executable)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary_path: Option<PathBuf>,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            unit_name: default_unit_name(),
            unit_dir: default_unit_dir(),
            default_delay_secs: default_delay(),
            binary_path: None,
        }
    }
}

fn home_or_fallback() -> PathBuf {
    get_home_dir().unwrap_or_else(|_| PathBuf::from("/var/lib"))
}

fn default_install_dir() -> PathBuf {
    home_or_fallback().join("strata")
}

fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| home_or_fallback().join(".config"))
        .join("strata")
}

fn default_state_dir() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| home_or_fallback().join(".local/state"))
        .join("strata")
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_network_timeout() -> u64 {
    120
}

fn default_executable_globs() -> Vec<String> {
    vec!["**/*.sh".to_string(), "bin/*".to_string()]
}

fn default_keep() -> usize {
    5
}

fn default_true() -> bool {
    true
}

fn default_compression_level() -> u32 {
    6
}

fn default_tools_manifest() -> Option<PathBuf> {
    Some(PathBuf::from("requirements/tools.txt"))
}

fn default_hook_timeout() -> u64 {
    600 // 10 minutes
}

fn default_unit_name() -> String {
    "strata-update".to_string()
}

fn default_unit_dir() -> PathBuf {
    PathBuf::from("/etc/systemd/system")
}

fn default_delay() -> u64 {
    3600
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = UpdaterConfig::default();
        assert_eq!(config.remote, "origin");
        assert_eq!(config.branch, "main");
        assert_eq!(config.backup.keep, 5);
        assert!(config.backup.include_config);
        assert_eq!(config.schedule.unit_name, "strata-update");
        assert!(config.hooks.reload_services);
    }

    #[test]
    fn test_derived_paths() {
        let config = UpdaterConfig {
            state_dir: PathBuf::from("/var/lib/strata"),
            ..UpdaterConfig::default()
        };
        assert_eq!(config.lock_path(), PathBuf::from("/var/lib/strata/update.lock"));
        assert_eq!(
            config.state_path(),
            PathBuf::from("/var/lib/strata/installation.json")
        );
        assert_eq!(config.log_path(), PathBuf::from("/var/lib/strata/update.log"));
        assert_eq!(config.backup_dir(), PathBuf::from("/var/lib/strata/backups"));
    }

    #[test]
    fn test_backup_dir_override() {
        let mut config = UpdaterConfig::default();
        config.backup.dir = Some(PathBuf::from("/mnt/backups"));
        assert_eq!(config.backup_dir(), PathBuf::from("/mnt/backups"));
    }

    #[test]
    fn test_backup_config_dir_respects_flag() {
        let mut config = UpdaterConfig::default();
        assert!(config.backup_config_dir().is_some());
        config.backup.include_config = false;
        assert!(config.backup_config_dir().is_none());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "install-dir: /opt/strata\nbackup:\n  keep: 3\n";
        let config: UpdaterConfig = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(config.install_dir, PathBuf::from("/opt/strata"));
        assert_eq!(config.backup.keep, 3);
        assert_eq!(config.backup.compression_level, 6);
        assert_eq!(config.branch, "main");
    }
}
