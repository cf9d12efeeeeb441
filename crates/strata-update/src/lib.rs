//! # strata-update
//!
//! The update workflow of the Strata updater:
//! - Single-instance locking with stale-lock reclaim
//! - Installed/remote version resolution over git
//! - The multi-phase apply (shelve, fetch, sync, permissions, hooks, persist)
//! - systemd timer based scheduling
//! - The [`UpdateOrchestrator`] state machine tying these to backups and rollback

pub mod cancel;
pub mod error;
pub mod executor;
pub mod hooks;
pub mod job;
pub mod lock;
pub mod orchestrator;
pub mod scheduler;
pub mod source;
pub mod version;

pub use cancel::{CancelFlag, CancelOnDrop};
pub use error::{ApplyPhase, Result, UpdateError};
pub use executor::{ApplyReport, UpdateExecutor};
pub use hooks::{default_hooks, HookContext, PostUpdateHook};
pub use job::{JobOutcome, JobState, UpdateJob};
pub use lock::{LockHandle, LockManager};
pub use orchestrator::{ApplyOptions, ConfirmUpdate, StatusReport, UpdateOrchestrator};
pub use scheduler::{Frequency, ScheduleConfig, ScheduleRequest, Scheduler, SystemManager, Systemctl};
pub use source::{GitSource, SourceControl};
pub use version::{CheckStatus, VersionTracker};
