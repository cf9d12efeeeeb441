//! Configuration loading and management

mod loader;
mod types;

pub use loader::{default_config_path, CONFIG_ENV_VAR};
pub use types::{BackupSettings, HookSettings, ScheduleSettings, UpdaterConfig};
