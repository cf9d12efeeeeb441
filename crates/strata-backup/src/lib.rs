//! Strata Backup System
//!
//! Recoverable snapshots of a toolkit installation and its configuration.
//!
//! # Features
//!
//! - **Paired archives**: the install tree and the config tree are stored as
//!   separate tar+gzip archives sharing one timestamp id
//! - **Atomic publish**: archives are written under a staging name and renamed
//!   into place; the metadata file is written last and marks the backup complete
//! - **Retention**: the newest N backups are kept, older pairs are removed
//!   together and orphaned archives are swept
//! - **Rollback**: validated, staged restore of either tree
//!
//! # Examples
//!
//! ```no_run
//! use strata_backup::{BackupManager, RollbackManager};
//! use strata_core::VersionRef;
//! use std::path::Path;
//!
//! fn main() -> strata_backup::Result<()> {
//!     let manager = BackupManager::new("/var/lib/strata/backups");
//!     let record = manager.create(
//!         Path::new("/opt/strata"),
//!         Some(Path::new("/etc/strata")),
//!         true,
//!         &VersionRef::from("v1.2.0"),
//!     )?;
//!
//!     manager.prune(5)?;
//!     RollbackManager::new().rollback(&record, Path::new("/opt/strata"), None)?;
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod error;
pub mod manager;
pub mod record;
pub mod rollback;

pub use archive::{calculate_checksum, ArchiveStats, DEFAULT_COMPRESSION_LEVEL};
pub use error::{Error, Result};
pub use manager::{BackupManager, PruneReport, DEFAULT_KEEP};
pub use record::BackupRecord;
pub use rollback::{RollbackManager, RollbackReport};
