//! `run` and `once`: drive the reconciliation loop.

use anyhow::Result;
use clap::Args;
use depthsync_core::ConfigLoader;
use std::path::PathBuf;
use tracing::{error, info};

use super::setup::build_executor;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Config file path
    #[arg(short, long, default_value = "config/Config.toml", env = "DEPTHSYNC_CONFIG")]
    pub config: PathBuf,
}

/// Runs cycles until SIGINT or SIGTERM.
pub async fn run(args: RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "Starting depthsync");
    let config = ConfigLoader::load(&args.config)?;
    let executor = build_executor(&config)?;

    executor.run(shutdown_signal()).await;

    info!("depthsync stopped");
    Ok(())
}

/// Runs a single cycle and prints its report as JSON.
pub async fn once(args: RunArgs) -> Result<()> {
    let config = ConfigLoader::load(&args.config)?;
    let executor = build_executor(&config)?;

    let report = executor.run_cycle().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.all_committed() {
        anyhow::bail!("one or more accounts did not commit");
    }
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM, initiating graceful shutdown"),
                    _ = ctrl_c() => {}
                }
                return;
            }
            Err(e) => error!(error = %e, "Failed to install SIGTERM handler"),
        }
    }

    ctrl_c().await;
}

async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received SIGINT (Ctrl+C), initiating graceful shutdown"),
        Err(e) => {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    }
}
