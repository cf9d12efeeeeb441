//! Configuration file loading
//!
//! Precedence (low to high):
//! 1. Built-in defaults
//! 2. The config file (`--config`, `$STRATA_CONFIG`, or `<config-dir>/strata/updater.yaml`)
//! 3. Environment variables (`STRATA_*` prefix)

use super::types::UpdaterConfig;
use crate::error::{Error, Result};
use crate::utils::get_home_dir;
use globset::Glob;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "STRATA_CONFIG";

const CONFIG_FILE_NAME: &str = "updater.yaml";

/// Default location of the updater config file
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .or_else(|| get_home_dir().ok().map(|h| h.join(".config")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("strata")
        .join(CONFIG_FILE_NAME)
}

impl UpdaterConfig {
    /// Load configuration from the specified path or the default locations.
    ///
    /// An explicitly named file must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from));

        let mut config = match explicit {
            Some(p) => Self::load_file(&p)?,
            None => {
                let default_path = default_config_path();
                if default_path.exists() {
                    Self::load_file(&default_path)?
                } else {
                    debug!("No config file at {}, using defaults", default_path.display());
                    Self::default()
                }
            }
        };

        config.apply_env_overrides()?;
        config.expand_paths();
        config.validate()?;
        Ok(config)
    }

    /// Parse a single YAML config file
    pub fn load_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::config_not_found(path.display().to_string())
            } else {
                Error::Io(e)
            }
        })?;

        debug!("Loading config from {}", path.display());
        let config: Self = serde_yaml_ng::from_str(&content).map_err(|e| {
            Error::invalid_config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(val) = env::var("STRATA_INSTALL_DIR") {
            self.install_dir = PathBuf::from(val);
        }
        if let Ok(val) = env::var("STRATA_CONFIG_DIR") {
            self.config_dir = PathBuf::from(val);
        }
        if let Ok(val) = env::var("STRATA_STATE_DIR") {
            self.state_dir = PathBuf::from(val);
        }
        if let Ok(val) = env::var("STRATA_BRANCH") {
            self.branch = val;
        }
        if let Ok(val) = env::var("STRATA_NETWORK_TIMEOUT_SECS") {
            self.network_timeout_secs = val.parse().map_err(|_| {
                Error::invalid_config("STRATA_NETWORK_TIMEOUT_SECS must be a valid number")
            })?;
        }
        if let Ok(val) = env::var("STRATA_BACKUP_KEEP") {
            self.backup.keep = val
                .parse()
                .map_err(|_| Error::invalid_config("STRATA_BACKUP_KEEP must be a valid number"))?;
        }
        Ok(())
    }

    /// Expand a leading `~/` in every configured path
    fn expand_paths(&mut self) {
        self.install_dir = expand_home(&self.install_dir);
        self.config_dir = expand_home(&self.config_dir);
        self.state_dir = expand_home(&self.state_dir);
        self.schedule.unit_dir = expand_home(&self.schedule.unit_dir);
        if let Some(dir) = &self.backup.dir {
            self.backup.dir = Some(expand_home(dir));
        }
        if let Some(bin) = &self.schedule.binary_path {
            self.schedule.binary_path = Some(expand_home(bin));
        }
    }

    /// Check value ranges and patterns
    pub fn validate(&self) -> Result<()> {
        if self.backup.keep == 0 {
            return Err(Error::invalid_config("backup.keep must be at least 1"));
        }
        if !(1..=9).contains(&self.backup.compression_level) {
            return Err(Error::invalid_config(format!(
                "backup.compression-level must be 1-9, got {}",
                self.backup.compression_level
            )));
        }
        if self.remote.trim().is_empty() {
            return Err(Error::invalid_config("remote must not be empty"));
        }
        if self.branch.trim().is_empty() {
            return Err(Error::invalid_config("branch must not be empty"));
        }
        if self.network_timeout_secs == 0 {
            return Err(Error::invalid_config(
                "network-timeout-secs must be greater than zero",
            ));
        }
        if self.hooks.timeout_secs == 0 {
            return Err(Error::invalid_config(
                "hooks.timeout-secs must be greater than zero",
            ));
        }
        // Rollback replaces these trees wholesale; backups inside them would be lost.
        let backup_dir = self.backup_dir();
        for (name, tree) in [
            ("install-dir", &self.install_dir),
            ("config-dir", &self.config_dir),
        ] {
            if backup_dir.starts_with(tree) {
                return Err(Error::invalid_config(format!(
                    "backup directory {} must not be inside {} {}",
                    backup_dir.display(),
                    name,
                    tree.display()
                )));
            }
        }
        let unit = &self.schedule.unit_name;
        if unit.is_empty() || unit.contains('/') || unit.contains(char::is_whitespace) {
            return Err(Error::invalid_config(format!(
                "schedule.unit-name is not a valid unit name: {:?}",
                unit
            )));
        }
        for pattern in &self.executable_globs {
            Glob::new(pattern).map_err(|e| {
                Error::invalid_config(format!("Invalid executable glob {:?}: {}", pattern, e))
            })?;
        }
        for (name, command) in [
            ("hooks.validate-command", &self.hooks.validate_command),
            ("hooks.install-command", &self.hooks.install_command),
        ] {
            if matches!(command, Some(argv) if argv.is_empty()) {
                return Err(Error::invalid_config(format!("{} must not be empty", name)));
            }
        }
        Ok(())
    }
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match get_home_dir() {
            Ok(home) => home.join(rest),
            Err(_) => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn clear_env() {
        for var in [
            CONFIG_ENV_VAR,
            "STRATA_INSTALL_DIR",
            "STRATA_CONFIG_DIR",
            "STRATA_STATE_DIR",
            "STRATA_BRANCH",
            "STRATA_NETWORK_TIMEOUT_SECS",
            "STRATA_BACKUP_KEEP",
        ] {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_load_explicit_file() {
        clear_env();
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("updater.yaml");
        fs::write(
            &path,
            "install-dir: /opt/strata\nbranch: stable\nbackup:\n  keep: 2\n",
        )
        .unwrap();

        let config = UpdaterConfig::load(Some(&path)).unwrap();
        assert_eq!(config.install_dir, PathBuf::from("/opt/strata"));
        assert_eq!(config.branch, "stable");
        assert_eq!(config.backup.keep, 2);
    }

    #[test]
    #[serial]
    fn test_explicit_missing_file_is_an_error() {
        clear_env();
        let result = UpdaterConfig::load(Some(Path::new("/nonexistent/strata/updater.yaml")));
        assert!(matches!(result, Err(Error::ConfigNotFound { .. })));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("updater.yaml");
        fs::write(&path, "branch: main\n").unwrap();

        env::set_var("STRATA_STATE_DIR", "/tmp/strata-state");
        env::set_var("STRATA_BRANCH", "edge");
        env::set_var("STRATA_NETWORK_TIMEOUT_SECS", "15");
        let config = UpdaterConfig::load(Some(&path));
        clear_env();

        let config = config.unwrap();
        assert_eq!(config.state_dir, PathBuf::from("/tmp/strata-state"));
        assert_eq!(config.branch, "edge");
        assert_eq!(config.network_timeout_secs, 15);
    }

    #[test]
    #[serial]
    fn test_invalid_env_number() {
        clear_env();
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("updater.yaml");
        fs::write(&path, "{}\n").unwrap();

        env::set_var("STRATA_BACKUP_KEEP", "many");
        let result = UpdaterConfig::load(Some(&path));
        clear_env();

        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn test_validate_rejects_zero_keep() {
        let mut config = UpdaterConfig::default();
        config.backup.keep = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_glob() {
        let config = UpdaterConfig {
            executable_globs: vec!["scripts/[".to_string()],
            ..UpdaterConfig::default()
        };
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("Invalid executable glob"), "got: {}", err);
    }

    #[test]
    fn test_validate_rejects_empty_command() {
        let mut config = UpdaterConfig::default();
        config.hooks.install_command = Some(vec![]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unit_name_with_slash() {
        let mut config = UpdaterConfig::default();
        config.schedule.unit_name = "../evil".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_backups_inside_install_dir() {
        let mut config = UpdaterConfig {
            install_dir: PathBuf::from("/opt/strata"),
            ..UpdaterConfig::default()
        };
        config.backup.dir = Some(PathBuf::from("/opt/strata/backups"));
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("must not be inside install-dir"), "got: {}", err);
    }

    #[test]
    fn test_expand_home() {
        if let Ok(home) = get_home_dir() {
            assert_eq!(expand_home(Path::new("~/strata")), home.join("strata"));
        }
        assert_eq!(expand_home(Path::new("/opt/x")), PathBuf::from("/opt/x"));
    }
}
