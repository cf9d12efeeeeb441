//! CLI command implementations

pub mod apply;
pub mod backup;
pub mod check;
pub mod rollback;
pub mod schedule;
pub mod status;

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use strata_core::UpdaterConfig;
use strata_update::{GitSource, Systemctl, UpdateOrchestrator};
use tracing::debug;

use crate::cli::{Cli, Commands};

pub async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Check(args) => check::run(args, config_path).await,
        Commands::Apply(args) => apply::run(args, config_path).await,
        Commands::Status(args) => status::run(args, config_path).await,
        Commands::Schedule(args) => schedule::run(args, config_path).await,
        Commands::Backup(cmd) => backup::run(cmd, config_path).await,
        Commands::Rollback(args) => rollback::run(args, config_path).await,
    }
}

/// Load the updater config and wire an orchestrator to git and systemd
pub(crate) fn orchestrator(config_path: Option<&Path>) -> Result<UpdateOrchestrator> {
    let config = UpdaterConfig::load(config_path).context("Failed to load updater configuration")?;

    debug!(
        "Managing {} from {} ({})",
        config.install_dir.display(),
        config.remote,
        config.branch
    );

    let source = GitSource::new(config.remote.clone(), config.branch.clone());
    // Units under a systemd/user directory belong to the per-user manager
    let system = if config.schedule.unit_dir.ends_with("systemd/user") {
        Systemctl::user()
    } else {
        Systemctl::new()
    };

    let orchestrator =
        UpdateOrchestrator::new(Arc::new(config), Arc::new(source), Arc::new(system))
            .context("Failed to initialise the updater")?
            .with_config_file(config_path.map(Path::to_path_buf));
    Ok(orchestrator)
}
