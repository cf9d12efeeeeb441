//! Strata CLI - self-update and rollback for the Strata toolkit
//!
//! Exit codes: 0 on success (including "already up to date"), 1 on failure,
//! 75 when another update holds the lock, 130 when interrupted.

mod cli;
mod commands;
mod output;

use clap::Parser;
use std::process::ExitCode;
use strata_update::UpdateError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::Cli;

const EXIT_FAILURE: u8 = 1;
/// EX_TEMPFAIL
const EXIT_LOCK_HELD: u8 = 75;
const EXIT_INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    // Dropping the command future on a signal cancels the job. Its update
    // lock is held until blocking steps in flight return; runtime shutdown
    // waits for them.
    let result = tokio::select! {
        result = commands::run(cli) => result,
        signal = shutdown_signal() => {
            output::warning(&format!("Interrupted by {}, update cancelled", signal));
            return ExitCode::from(EXIT_INTERRUPTED);
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = exit_code(&e);
            if code == EXIT_LOCK_HELD {
                output::warning(&format!("{:#}", e));
            } else {
                output::error(&format!("{:#}", e));
            }
            ExitCode::from(code)
        }
    }
}

/// Initialize tracing with appropriate verbosity
fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}

fn exit_code(err: &anyhow::Error) -> u8 {
    match err.chain().find_map(|e| e.downcast_ref::<UpdateError>()) {
        Some(UpdateError::LockHeld { .. }) => EXIT_LOCK_HELD,
        Some(UpdateError::Cancelled) => EXIT_INTERRUPTED,
        _ => EXIT_FAILURE,
    }
}

/// Resolves with the name of the first SIGINT/SIGTERM received
async fn shutdown_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => tokio::select! {
                _ = ctrl_c() => "SIGINT",
                _ = term.recv() => "SIGTERM",
            },
            Err(_) => {
                ctrl_c().await;
                "SIGINT"
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c().await;
        "Ctrl-C"
    }
}

/// Ctrl-C, or never when the handler cannot be installed
async fn ctrl_c() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}
