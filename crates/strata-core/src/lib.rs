//! # strata-core
//!
//! Core library for the Strata updater providing:
//! - Updater configuration (updater.yaml) with environment overrides
//! - Version references
//! - Atomically persisted installation state
//! - The append-only update log

pub mod config;
pub mod error;
pub mod state;
pub mod update_log;
pub mod utils;
pub mod version;

pub use config::{BackupSettings, HookSettings, ScheduleSettings, UpdaterConfig};
pub use error::{Error, Result};
pub use state::{InstallationState, StateStore};
pub use update_log::{LogEntry, LogOutcome, UpdateLog};
pub use utils::{atomic_write, get_home_dir};
pub use version::VersionRef;
