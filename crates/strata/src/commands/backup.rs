//! Backup commands

use anyhow::Result;
use std::path::Path;
use strata_backup::BackupRecord;
use tabled::{settings::Style, Table, Tabled};

use crate::cli::{BackupCommands, BackupCreateArgs, BackupListArgs, BackupPruneArgs};
use crate::commands::orchestrator;
use crate::output;

pub async fn run(cmd: BackupCommands, config_path: Option<&Path>) -> Result<()> {
    match cmd {
        BackupCommands::Create(args) => create(args, config_path).await,
        BackupCommands::List(args) => list(args, config_path),
        BackupCommands::Prune(args) => prune(args, config_path).await,
    }
}

async fn create(args: BackupCreateArgs, config_path: Option<&Path>) -> Result<()> {
    let orchestrator = orchestrator(config_path)?;
    let include_config = orchestrator.config().backup.include_config && !args.no_config;

    let spinner = output::spinner("Creating backup...", true);
    let result = orchestrator.create_backup(include_config).await;
    spinner.finish_and_clear();
    let record = result?;

    output::success(&format!("Backup {} created", record.id));
    output::kv("Version", record.source_version_ref.as_str());
    output::kv("Files", &record.file_count.to_string());
    output::kv("Size", &output::format_bytes(record.size_bytes));
    output::kv("Install archive", &record.install_archive.display().to_string());
    if let Some(config) = &record.config_archive {
        output::kv("Config archive", &config.display().to_string());
    }
    Ok(())
}

#[derive(Tabled)]
struct BackupRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Created")]
    created: String,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "Config")]
    config: String,
}

impl From<&BackupRecord> for BackupRow {
    fn from(record: &BackupRecord) -> Self {
        Self {
            id: record.id.clone(),
            version: record.source_version_ref.short().to_string(),
            created: output::format_time(&record.created_at),
            size: output::format_bytes(record.size_bytes),
            config: if record.has_config() { "yes" } else { "no" }.to_string(),
        }
    }
}

fn list(args: BackupListArgs, config_path: Option<&Path>) -> Result<()> {
    let orchestrator = orchestrator(config_path)?;
    let backups = orchestrator.list_backups()?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&backups)?);
        return Ok(());
    }

    if backups.is_empty() {
        output::info(&format!(
            "No backups in {}",
            orchestrator.config().backup_dir().display()
        ));
        return Ok(());
    }

    let rows: Vec<BackupRow> = backups.iter().map(BackupRow::from).collect();
    let mut table = Table::new(rows);
    table.with(Style::sharp());
    println!("{}", table);
    Ok(())
}

async fn prune(args: BackupPruneArgs, config_path: Option<&Path>) -> Result<()> {
    let orchestrator = orchestrator(config_path)?;
    let report = orchestrator.prune_backups(args.keep).await?;

    if report.removed.is_empty() && report.orphans_removed.is_empty() {
        output::info("Nothing to prune");
        return Ok(());
    }
    output::success(&format!("Removed {} backup(s)", report.removed.len()));
    for id in &report.removed {
        output::kv("Removed", id);
    }
    if !report.orphans_removed.is_empty() {
        output::kv(
            "Orphaned archives",
            &report.orphans_removed.len().to_string(),
        );
    }
    Ok(())
}
