//! Status command

use anyhow::Result;
use std::path::Path;
use strata_core::LogEntry;
use tabled::{settings::Style, Table, Tabled};

use crate::cli::StatusArgs;
use crate::commands::orchestrator;
use crate::output;

#[derive(Tabled)]
struct LogRow {
    time: String,
    outcome: String,
    version: String,
    backup: String,
    error: String,
}

impl From<&LogEntry> for LogRow {
    fn from(entry: &LogEntry) -> Self {
        let error = match (&entry.phase, &entry.error) {
            (Some(phase), Some(err)) => format!("{}: {}", phase, err),
            (None, Some(err)) => err.clone(),
            _ => String::new(),
        };
        Self {
            time: output::format_time(&entry.timestamp),
            outcome: entry.outcome.to_string(),
            version: entry.version.short().to_string(),
            backup: entry.backup_id.clone().unwrap_or_default(),
            error,
        }
    }
}

pub async fn run(args: StatusArgs, config_path: Option<&Path>) -> Result<()> {
    let orchestrator = orchestrator(config_path)?;
    let report = orchestrator.status().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    output::header("Installation");
    output::kv("Directory", &report.install_dir.display().to_string());
    output::kv("Version", report.current_version.as_str());
    match report.state.last_update_at {
        Some(at) => output::kv("Last update", &output::format_time(&at)),
        None => output::kv("Last update", "never"),
    }
    if let Some(pid) = report.lock_holder {
        output::kv("Update running", &format!("pid {}", pid));
    }

    output::header("Backups");
    output::kv("Count", &report.backup_count.to_string());
    if let Some(latest) = &report.latest_backup {
        output::kv(
            "Latest",
            &format!(
                "{} ({}, {})",
                latest.id,
                latest.source_version_ref.short(),
                output::format_bytes(latest.size_bytes)
            ),
        );
    }

    output::header("Schedule");
    match &report.schedule {
        Some(schedule) if schedule.enabled => {
            let when = schedule
                .expression
                .clone()
                .unwrap_or_else(|| schedule.frequency.to_string());
            output::kv("Runs", &when);
            output::kv(
                "Random delay",
                &format!("{}s", schedule.randomized_delay_secs),
            );
            match report.next_run {
                Some(next) => output::kv("Next run", &output::format_time(&next)),
                None => output::kv("Next run", "unknown"),
            }
        }
        _ => output::kv("Runs", "disabled"),
    }

    if !report.recent.is_empty() {
        output::header("Recent updates");
        let rows: Vec<LogRow> = report.recent.iter().map(LogRow::from).collect();
        let mut table = Table::new(rows);
        table.with(Style::sharp());
        println!("{}", table);
    }
    Ok(())
}
