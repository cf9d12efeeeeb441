//! Rollback command

use anyhow::{bail, Result};
use dialoguer::Confirm;
use std::path::Path;

use crate::cli::RollbackArgs;
use crate::commands::orchestrator;
use crate::output;

pub async fn run(args: RollbackArgs, config_path: Option<&Path>) -> Result<()> {
    let orchestrator = orchestrator(config_path)?;

    // Unknown ids are rejected by the orchestrator without touching anything
    if let Some(record) = orchestrator
        .list_backups()?
        .into_iter()
        .find(|b| b.id == args.backup_id)
    {
        output::header("Backup");
        output::kv("ID", &record.id);
        output::kv("Version", record.source_version_ref.as_str());
        output::kv("Created", &output::format_time(&record.created_at));
        output::kv("Size", &output::format_bytes(record.size_bytes));
        output::kv("Includes config", if record.has_config() { "yes" } else { "no" });
        println!();

        if !args.yes
            && console::user_attended()
            && !Confirm::new()
                .with_prompt(format!(
                    "Replace {} with this backup?",
                    orchestrator.config().install_dir.display()
                ))
                .default(false)
                .interact()?
        {
            bail!("Rollback cancelled");
        }
    }

    let spinner = output::spinner("Restoring backup...", true);
    let result = orchestrator.rollback(&args.backup_id).await;
    spinner.finish_and_clear();
    let report = result?;

    output::success(&format!(
        "Restored backup {} in {:.1}s",
        report.backup_id,
        report.duration.as_secs_f64()
    ));
    output::kv("Install", &report.install_restored.display().to_string());
    if let Some(config) = &report.config_restored {
        output::kv("Config", &config.display().to_string());
    }
    Ok(())
}
