//! Update orchestration
//!
//! [`UpdateOrchestrator`] composes the lock, version tracker, backups,
//! executor, rollback and scheduler into the user-facing operations. Each
//! `apply` runs one [`UpdateJob`] through the state machine:
//!
//! ```text
//! Idle -> CheckingVersion -> CreatingBackup -> Applying -> Verifying -> Complete -> Idle
//!              |  \                |               |           |
//!              |   `-> Idle        `---------------+-----------+--> Failed -> RollingBack -> Idle
//!              `-----------------------------------------------------'                 `-> Failed
//! ```
//!
//! Every job that gets past the lock, except up-to-date and declined
//! no-ops, appends one line to the update log. A job whose future is
//! dropped (signal) writes nothing; its lock is released once the last
//! blocking step it started has returned.

use crate::cancel::{run_blocking, CancelFlag};
use crate::error::{ApplyPhase, Result, UpdateError};
use crate::executor::UpdateExecutor;
use crate::hooks::{default_hooks, PostUpdateHook};
use crate::job::{JobOutcome, JobState, UpdateJob};
use crate::lock::LockManager;
use crate::scheduler::{ScheduleConfig, ScheduleRequest, Scheduler, SystemManager};
use crate::source::SourceControl;
use crate::version::{CheckStatus, VersionTracker};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use strata_backup::{BackupManager, BackupRecord, PruneReport, RollbackManager, RollbackReport};
use strata_core::{
    InstallationState, LogEntry, LogOutcome, StateStore, UpdateLog, UpdaterConfig, VersionRef,
};
use tracing::{error, info, warn};

/// Number of log entries included in a status report
const STATUS_LOG_ENTRIES: usize = 5;

/// Asked before an available update is applied; `false` declines it
pub type ConfirmUpdate = Box<dyn Fn(&VersionRef, &VersionRef) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy)]
pub struct ApplyOptions {
    /// Apply even when local and remote versions match
    pub force: bool,
    /// Do not take a backup first (disables auto-rollback)
    pub skip_backup: bool,
    /// Restore the job's backup when applying or verifying fails
    pub auto_rollback: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            force: false,
            skip_backup: false,
            auto_rollback: true,
        }
    }
}

/// Snapshot of the installation for `strata status`
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub install_dir: PathBuf,
    pub current_version: VersionRef,
    pub state: InstallationState,
    /// Pid of a live process holding the update lock
    pub lock_holder: Option<u32>,
    pub backup_count: usize,
    pub latest_backup: Option<BackupRecord>,
    pub schedule: Option<ScheduleConfig>,
    pub next_run: Option<DateTime<Utc>>,
    pub recent: Vec<LogEntry>,
}

pub struct UpdateOrchestrator {
    config: Arc<UpdaterConfig>,
    lock: LockManager,
    state: StateStore,
    log: UpdateLog,
    tracker: VersionTracker,
    backups: BackupManager,
    rollback: RollbackManager,
    executor: UpdateExecutor,
    scheduler: Scheduler,
    confirm: Option<ConfirmUpdate>,
}

impl UpdateOrchestrator {
    pub fn new(
        config: Arc<UpdaterConfig>,
        source: Arc<dyn SourceControl>,
        system: Arc<dyn SystemManager>,
    ) -> Result<Self> {
        let state = StateStore::new(config.state_path());
        let network_timeout = Duration::from_secs(config.network_timeout_secs);

        let binary = config
            .schedule
            .binary_path
            .clone()
            .or_else(|| std::env::current_exe().ok())
            .unwrap_or_else(|| PathBuf::from("strata"));
        let scheduler = Scheduler::new(
            Arc::clone(&system),
            &config.schedule,
            binary,
            state.clone(),
        );

        let hooks = default_hooks(
            &config.hooks,
            system,
            vec![scheduler.timer_path(), scheduler.service_path()],
        );
        let executor = UpdateExecutor::new(
            Arc::clone(&source),
            state.clone(),
            &config.executable_globs,
            network_timeout,
        )?
        .with_hooks(hooks);

        Ok(Self {
            lock: LockManager::new(config.lock_path()),
            log: UpdateLog::new(config.log_path()),
            tracker: VersionTracker::new(source, state.clone(), network_timeout),
            backups: BackupManager::new(config.backup_dir())
                .with_compression_level(config.backup.compression_level),
            rollback: RollbackManager::new(),
            executor,
            scheduler,
            state,
            confirm: None,
            config,
        })
    }

    /// Config file the scheduled service should be started with
    pub fn with_config_file(mut self, path: Option<PathBuf>) -> Self {
        self.scheduler = self.scheduler.with_config_file(path);
        self
    }

    pub fn with_confirm(mut self, confirm: ConfirmUpdate) -> Self {
        self.confirm = Some(confirm);
        self
    }

    /// Replace the post-update hooks
    pub fn with_hooks(mut self, hooks: Vec<Arc<dyn PostUpdateHook>>) -> Self {
        self.executor = self.executor.with_hooks(hooks);
        self
    }

    pub fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Compare the installed version with the remote one
    pub async fn check(&self, force: bool) -> Result<CheckStatus> {
        let cancel = CancelFlag::holding(self.lock.acquire()?);
        let guard = cancel.guard();

        let install = &self.config.install_dir;
        let current = self.tracker.current_version(install);
        let remote = self.tracker.remote_version(install, &cancel).await?;
        let status = VersionTracker::compare(&current, &remote, force);

        guard.disarm();
        Ok(status)
    }

    /// Run one update job.
    ///
    /// Returns the job when it ended back in `Idle` (up to date, declined,
    /// updated, or rolled back after a failure) and the error when it ended
    /// in `Failed`. A held lock fails before any job starts.
    ///
    /// The lock belongs to the job's cancel flag, so dropping this future
    /// (on a signal) cancels the job but keeps the lock until any blocking
    /// step still touching the installation has returned.
    pub async fn apply(&self, options: &ApplyOptions) -> Result<UpdateJob> {
        let cancel = CancelFlag::holding(self.lock.acquire()?);
        let guard = cancel.guard();

        let mut job = UpdateJob::new();
        let result = self.run_job(&mut job, options, &cancel).await;

        guard.disarm();
        result.map(|()| job)
    }

    async fn run_job(
        &self,
        job: &mut UpdateJob,
        options: &ApplyOptions,
        cancel: &CancelFlag,
    ) -> Result<()> {
        let install = self.config.install_dir.clone();

        info!("Stage 1/4: Checking version");
        job.transition(JobState::CheckingVersion);
        let current = self.tracker.current_version(&install);
        job.from_version = Some(current.clone());
        let remote = match self.tracker.remote_version(&install, cancel).await {
            Ok(remote) => remote,
            Err(e) => return Err(self.fail(job, e, &current)),
        };

        if let CheckStatus::UpToDate { version } =
            VersionTracker::compare(&current, &remote, options.force)
        {
            info!("Already up to date at {}", version);
            job.transition(JobState::Idle);
            job.finish(JobOutcome::UpToDate { version });
            return Ok(());
        }

        if let Some(confirm) = &self.confirm {
            if !confirm(&current, &remote) {
                info!("Update to {} declined", remote);
                job.transition(JobState::Idle);
                job.finish(JobOutcome::Declined { current, remote });
                return Ok(());
            }
        }
        job.to_version = Some(remote.clone());

        let backup = if options.skip_backup {
            warn!("Skipping backup; a failed update cannot be rolled back automatically");
            None
        } else {
            info!("Stage 2/4: Creating backup");
            job.transition(JobState::CreatingBackup);
            match self.take_backup(&current, self.config.backup.include_config, cancel).await {
                Ok(record) => {
                    job.backup_ref = Some(record.id.clone());
                    Some(record)
                }
                Err(e) => return Err(self.fail(job, e, &current)),
            }
        };

        info!("Stage 3/4: Applying update");
        job.transition(JobState::Applying);
        let report = match self
            .executor
            .apply(&install, &self.config.config_dir, cancel)
            .await
        {
            Ok(report) => report,
            Err(e) => {
                return self
                    .recover(job, e, backup.as_ref(), options, &current, cancel)
                    .await
            }
        };
        job.to_version = Some(report.version.clone());

        info!("Stage 4/4: Verifying");
        job.transition(JobState::Verifying);
        if let Err(e) = self.verify(&report.version) {
            return self
                .recover(job, e, backup.as_ref(), options, &current, cancel)
                .await;
        }

        job.transition(JobState::Complete);
        self.append_log(
            LogEntry::new(LogOutcome::Updated, report.version.clone())
                .with_from(current.clone())
                .with_backup(job.backup_ref.clone()),
        );
        info!("Updated {} -> {}", current, report.version);
        job.transition(JobState::Idle);
        job.finish(JobOutcome::Updated {
            from: current,
            to: report.version,
            backup_id: job.backup_ref.clone(),
        });
        Ok(())
    }

    /// Installation state must name the version just applied
    fn verify(&self, expected: &VersionRef) -> Result<()> {
        let recorded = self.state.load()?.and_then(|s| s.current_version_ref);
        match recorded {
            Some(actual) if &actual == expected => Ok(()),
            other => Err(UpdateError::VerifyFailed {
                expected: expected.clone(),
                actual: other.unwrap_or_else(VersionRef::unknown),
                backup_id: None,
            }),
        }
    }

    /// Handle a failure after the backup stage, rolling back when allowed
    async fn recover(
        &self,
        job: &mut UpdateJob,
        err: UpdateError,
        backup: Option<&BackupRecord>,
        options: &ApplyOptions,
        from: &VersionRef,
        cancel: &CancelFlag,
    ) -> Result<()> {
        let err = err.with_backup(job.backup_ref.clone());
        let phase = failure_phase(job.state, &err);

        let record = match backup {
            Some(record) if options.auto_rollback && rollback_eligible(&err) => record.clone(),
            _ => return Err(self.fail(job, err, from)),
        };

        error!("{}; rolling back to backup {}", err, record.id);
        job.fail(&err);
        job.transition(JobState::RollingBack);

        let rollback = self.rollback.clone();
        let install = self.config.install_dir.clone();
        let config_dir = self.config.config_dir.clone();
        let restore = record.clone();
        // Once started a rollback runs to completion; it only shares the job's lock
        let result = run_blocking(&cancel.detached(), None, "rollback", move |_| {
            Ok(rollback.rollback(&restore, &install, Some(&config_dir))?)
        })
        .await;

        match result {
            Ok(report) => {
                info!(
                    "Rolled back to {} in {:?}",
                    record.source_version_ref, report.duration
                );
                self.append_log(
                    LogEntry::new(LogOutcome::RolledBack, record.source_version_ref.clone())
                        .with_from(from.clone())
                        .with_backup(Some(record.id.clone()))
                        .with_error(phase, err.to_string()),
                );
                job.transition(JobState::Idle);
                job.finish(JobOutcome::RolledBack {
                    backup_id: record.id,
                    cause: err.to_string(),
                });
                Ok(())
            }
            Err(rollback_err) => {
                error!("Automatic rollback failed: {}", rollback_err);
                job.error = Some(format!("{}; {}", err, rollback_err));
                job.transition(JobState::Failed);
                self.append_log(
                    LogEntry::new(
                        LogOutcome::Failed,
                        self.tracker.current_version(&self.config.install_dir),
                    )
                    .with_from(from.clone())
                    .with_backup(Some(record.id))
                    .with_error(
                        format!("{}/{}", phase, JobState::RollingBack),
                        format!("{}; {}", err, rollback_err),
                    ),
                );
                Err(rollback_err)
            }
        }
    }

    /// Move the job to `Failed`, log it, and hand back the error
    fn fail(&self, job: &mut UpdateJob, err: UpdateError, from: &VersionRef) -> UpdateError {
        let err = err.with_backup(job.backup_ref.clone());
        let phase = failure_phase(job.state, &err);
        error!("Update failed during {}: {}", phase, err);
        job.fail(&err);

        self.append_log(
            LogEntry::new(
                LogOutcome::Failed,
                self.tracker.current_version(&self.config.install_dir),
            )
            .with_from(from.clone())
            .with_backup(job.backup_ref.clone())
            .with_error(phase, err.to_string()),
        );
        if let Some(id) = &job.backup_ref {
            info!("Backup {} is kept; restore it with `strata rollback {}`", id, id);
        }
        err
    }

    async fn take_backup(
        &self,
        version: &VersionRef,
        include_config: bool,
        cancel: &CancelFlag,
    ) -> Result<BackupRecord> {
        let backups = self.backups.clone();
        let install = self.config.install_dir.clone();
        let config_dir = self.config.config_dir.clone();
        let version = version.clone();
        let keep = self.config.backup.keep;

        run_blocking(cancel, None, "backup", move |flag| {
            let record = backups.create_with_abort(
                &install,
                Some(&config_dir),
                include_config,
                &version,
                &|| flag.is_cancelled(),
            )?;
            match backups.prune(keep) {
                Ok(report) if !report.is_empty() => info!(
                    "Pruned {} old backups ({} orphaned files)",
                    report.removed.len(),
                    report.orphans_removed.len()
                ),
                Ok(_) => {}
                Err(e) => warn!("Could not prune old backups: {}", e),
            }
            Ok(record)
        })
        .await
    }

    /// Restore the installation from backup `id`
    pub async fn rollback(&self, id: &str) -> Result<RollbackReport> {
        let job = CancelFlag::holding(self.lock.acquire()?);

        let record = self.backups.find(id)?.ok_or_else(|| UpdateError::InvalidBackup {
            id: id.to_string(),
            reason: format!("no such backup in {}", self.backups.dir().display()),
        })?;
        let from = self.tracker.current_version(&self.config.install_dir);

        let rollback = self.rollback.clone();
        let install = self.config.install_dir.clone();
        let config_dir = self.config.config_dir.clone();
        let restore = record.clone();
        let result = run_blocking(&job, None, "rollback", move |_| {
            Ok(rollback.rollback(&restore, &install, Some(&config_dir))?)
        })
        .await;

        match &result {
            Ok(_) => self.append_log(
                LogEntry::new(LogOutcome::Restored, record.source_version_ref.clone())
                    .with_from(from)
                    .with_backup(Some(record.id.clone())),
            ),
            // Validation failures leave everything untouched
            Err(UpdateError::InvalidBackup { .. }) => {}
            Err(e) => self.append_log(
                LogEntry::new(
                    LogOutcome::Failed,
                    self.tracker.current_version(&self.config.install_dir),
                )
                .with_from(from)
                .with_backup(Some(record.id.clone()))
                .with_error(JobState::RollingBack.to_string(), e.to_string()),
            ),
        }
        result
    }

    /// Take a backup of the current installation outside an update
    pub async fn create_backup(&self, include_config: bool) -> Result<BackupRecord> {
        let cancel = CancelFlag::holding(self.lock.acquire()?);
        let guard = cancel.guard();
        let version = self.tracker.current_version(&self.config.install_dir);
        let result = self.take_backup(&version, include_config, &cancel).await;
        guard.disarm();
        result
    }

    /// Backups, newest first
    pub fn list_backups(&self) -> Result<Vec<BackupRecord>> {
        Ok(self.backups.list()?)
    }

    /// Keep the newest `keep` backups (the configured count when `None`)
    pub async fn prune_backups(&self, keep: Option<usize>) -> Result<PruneReport> {
        let job = CancelFlag::holding(self.lock.acquire()?);
        let keep = keep.unwrap_or(self.config.backup.keep);
        let backups = self.backups.clone();
        run_blocking(&job, None, "prune", move |_| Ok(backups.prune(keep)?)).await
    }

    /// Apply a `schedule` request; returns the installed schedule, if any
    pub async fn schedule(
        &self,
        request: ScheduleRequest,
        delay_secs: Option<u64>,
    ) -> Result<Option<ScheduleConfig>> {
        // Schedule changes rewrite installation state; never interleave with an update
        let _lock = self.lock.acquire()?;
        let delay = delay_secs.unwrap_or(self.config.schedule.default_delay_secs);
        match request {
            ScheduleRequest::Disable => {
                self.scheduler.disable_schedule().await?;
                Ok(None)
            }
            ScheduleRequest::Set(frequency, expression) => {
                let mut config = ScheduleConfig::new(frequency, delay);
                config.expression = expression;
                self.scheduler.set_schedule(&config).await?;
                Ok(Some(config))
            }
        }
    }

    pub async fn status(&self) -> Result<StatusReport> {
        let backups = self.backups.list()?;
        let recent = match self.log.tail(STATUS_LOG_ENTRIES) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Could not read update log: {}", e);
                Vec::new()
            }
        };

        Ok(StatusReport {
            install_dir: self.config.install_dir.clone(),
            current_version: self.tracker.current_version(&self.config.install_dir),
            state: self.state.load_or_default()?,
            lock_holder: self.lock.holder(),
            backup_count: backups.len(),
            latest_backup: backups.into_iter().next(),
            schedule: self.scheduler.current()?,
            next_run: self.scheduler.next_run().await,
            recent,
        })
    }

    fn append_log(&self, entry: LogEntry) {
        if let Err(e) = self.log.append(&entry) {
            warn!(
                "Could not append to update log {}: {}",
                self.log.path().display(),
                e
            );
        }
    }
}

/// Where a failure happened, e.g. `applying/hooks`
fn failure_phase(state: JobState, err: &UpdateError) -> String {
    match err {
        UpdateError::ApplyFailed { phase, .. } => format!("{}/{}", state, phase),
        _ => state.to_string(),
    }
}

/// Only failures after the work tree was touched are rolled back
fn rollback_eligible(err: &UpdateError) -> bool {
    match err {
        UpdateError::ApplyFailed { phase, .. } => {
            !matches!(phase, ApplyPhase::Shelve | ApplyPhase::Fetch)
        }
        UpdateError::VerifyFailed { .. } => true,
        _ => false,
    }
}
