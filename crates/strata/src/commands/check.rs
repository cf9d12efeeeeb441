//! Check command

use anyhow::Result;
use std::path::Path;
use strata_update::CheckStatus;

use crate::cli::CheckArgs;
use crate::commands::orchestrator;
use crate::output;

pub async fn run(args: CheckArgs, config_path: Option<&Path>) -> Result<()> {
    let orchestrator = orchestrator(config_path)?;

    let spinner = output::spinner("Checking for updates...", !args.json);
    let status = orchestrator.check(args.force).await;
    spinner.finish_and_clear();
    let status = status?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    match status {
        CheckStatus::UpToDate { version } => {
            output::success(&format!("Up to date ({})", version.short()));
        }
        CheckStatus::UpdateAvailable { current, remote } => {
            output::info(&format!(
                "Update available: {} -> {}",
                current.short(),
                remote.short()
            ));
            output::info("Run `strata apply` to install it");
        }
    }
    Ok(())
}
