//! CLI argument parsing with clap

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use strata_update::ScheduleRequest;

/// Strata - keep the installed toolkit up to date
#[derive(Parser, Debug)]
#[command(name = "strata")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to updater.yaml
    #[arg(short, long, global = true, env = "STRATA_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check whether an update is available
    Check(CheckArgs),

    /// Update the installation to the remote version
    Apply(ApplyArgs),

    /// Show installation, backup and schedule status
    Status(StatusArgs),

    /// Configure periodic unattended updates
    Schedule(ScheduleArgs),

    /// Backup management
    #[command(subcommand)]
    Backup(BackupCommands),

    /// Restore the installation from a backup
    Rollback(RollbackArgs),
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Report an update even when versions match
    #[arg(short, long)]
    pub force: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ApplyArgs {
    /// Apply even when already up to date
    #[arg(short, long)]
    pub force: bool,

    /// Do not back up the installation first
    #[arg(long)]
    pub skip_backup: bool,

    /// Keep a failed update in place instead of restoring the backup
    #[arg(long)]
    pub no_rollback: bool,

    /// Do not ask for confirmation
    #[arg(short, long)]
    pub yes: bool,

    /// Never prompt and show no progress spinners (scheduled runs)
    #[arg(long)]
    pub non_interactive: bool,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ScheduleArgs {
    /// daily, weekly, monthly, custom=<OnCalendar expression> or disable
    #[arg(value_name = "SCHEDULE")]
    pub schedule: ScheduleRequest,

    /// Random delay added to each run, in seconds
    #[arg(long, value_name = "SECS")]
    pub delay: Option<u64>,
}

#[derive(Subcommand, Debug)]
pub enum BackupCommands {
    /// Back up the installation now
    Create(BackupCreateArgs),

    /// List backups, newest first
    List(BackupListArgs),

    /// Delete all but the newest backups
    Prune(BackupPruneArgs),
}

#[derive(Args, Debug)]
pub struct BackupCreateArgs {
    /// Leave the configuration directory out
    #[arg(long)]
    pub no_config: bool,
}

#[derive(Args, Debug)]
pub struct BackupListArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct BackupPruneArgs {
    /// Number of backups to keep (defaults to backup.keep)
    #[arg(short, long)]
    pub keep: Option<usize>,
}

#[derive(Args, Debug)]
pub struct RollbackArgs {
    /// Id of the backup to restore (see `strata backup list`)
    pub backup_id: String,

    /// Do not ask for confirmation
    #[arg(short, long)]
    pub yes: bool,
}
