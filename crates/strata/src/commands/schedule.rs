//! Schedule command

use anyhow::Result;
use std::path::Path;

use crate::cli::ScheduleArgs;
use crate::commands::orchestrator;
use crate::output;

pub async fn run(args: ScheduleArgs, config_path: Option<&Path>) -> Result<()> {
    let orchestrator = orchestrator(config_path)?;

    match orchestrator.schedule(args.schedule, args.delay).await? {
        None => output::success("Automatic updates disabled"),
        Some(schedule) => {
            let when = schedule
                .expression
                .clone()
                .unwrap_or_else(|| schedule.frequency.to_string());
            output::success(&format!("Automatic updates scheduled: {}", when));
            output::kv(
                "Random delay",
                &format!("{}s", schedule.randomized_delay_secs),
            );
            match orchestrator.scheduler().next_run().await {
                Some(next) => output::kv("Next run", &output::format_time(&next)),
                None => output::kv("Next run", "unknown (systemd not available)"),
            }
        }
    }
    Ok(())
}
