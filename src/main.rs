// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Snapshot manager daemon.
//!
//! Usage:
//!   snapshot-manager start          # run passes until SIGINT/SIGTERM
//!   snapshot-manager execute-cli    # one pass, then exit
//!
//! Runs in the foreground; daemonizing is left to the service manager.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use snapshot_manager::config::DEFAULT_CONFIG_PATH;
use snapshot_manager::{ManagerConfig, Scheduler, ZfsInventory};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// ZFS snapshot scheduling, retention and replication.
#[derive(Parser)]
#[command(name = "snapshot-manager")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run passes on the configured interval until interrupted
    Start,
    /// Run a single pass and exit
    #[command(name = "execute-cli")]
    ExecuteCli,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ManagerConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let inventory: ZfsInventory = ZfsInventory::default();
    let scheduler = Arc::new(
        Scheduler::new(Arc::new(inventory), &config).context("invalid configuration")?,
    );

    match cli.command {
        Command::ExecuteCli => {
            info!("Executing single run");
            let report = scheduler.run_once().await?;
            let failed = report.failed().count();
            info!(
                volumes = report.outcomes.len(),
                executed = report.executed(),
                failed,
                "Single run complete"
            );
            if failed > 0 {
                anyhow::bail!("{} volume(s) failed", failed);
            }
        }
        Command::Start => {
            info!("Starting up daemon");
            let signal_scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move {
                shutdown_signal().await;
                info!("Shutdown requested, finishing current pass");
                signal_scheduler.shutdown();
            });
            scheduler.run_forever().await;
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "unable to install ctrl+c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "unable to install sigterm handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
