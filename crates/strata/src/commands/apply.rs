//! Apply command

use anyhow::{bail, Result};
use dialoguer::Confirm;
use std::path::Path;
use strata_update::{ApplyOptions, JobOutcome, UpdateError};

use crate::cli::ApplyArgs;
use crate::commands::orchestrator;
use crate::output;

pub async fn run(args: ApplyArgs, config_path: Option<&Path>) -> Result<()> {
    let mut orchestrator = orchestrator(config_path)?;

    let interactive = !args.non_interactive && console::user_attended();
    if interactive && !args.yes {
        orchestrator = orchestrator.with_confirm(Box::new(|current, remote| {
            Confirm::new()
                .with_prompt(format!(
                    "Update {} -> {}?",
                    current.short(),
                    remote.short()
                ))
                .default(true)
                .interact()
                .unwrap_or(false)
        }));
    }

    let options = ApplyOptions {
        force: args.force,
        skip_backup: args.skip_backup,
        auto_rollback: !args.no_rollback,
    };

    let job = match orchestrator.apply(&options).await {
        Ok(job) => job,
        Err(e) => {
            if let Some(id) = e.backup_id() {
                output::info(&format!(
                    "The installation was backed up first; restore it with `strata rollback {}`",
                    id
                ));
            }
            return Err(e.into());
        }
    };

    match job.outcome {
        Some(JobOutcome::UpToDate { version }) => {
            output::success(&format!("Already up to date ({})", version.short()));
        }
        Some(JobOutcome::Declined { .. }) => {
            output::info("Update cancelled");
        }
        Some(JobOutcome::Updated {
            from,
            to,
            backup_id,
        }) => {
            output::success(&format!("Updated {} -> {}", from.short(), to.short()));
            if let Some(id) = backup_id {
                output::kv("Backup", &id);
            }
        }
        Some(JobOutcome::RolledBack { backup_id, cause }) => {
            output::warning(&format!(
                "The update failed and backup {} was restored",
                backup_id
            ));
            bail!("{}", cause);
        }
        None => return Err(UpdateError::Cancelled.into()),
    }
    Ok(())
}
