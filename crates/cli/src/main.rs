use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

use commands::{CacheArgs, RunArgs};

#[derive(Parser)]
#[command(name = "depthsync")]
#[command(about = "Keeps exchange positions in line with weighted trading signals", long_about = None)]
struct Cli {
    /// Append logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the reconciliation loop until interrupted
    Run(RunArgs),
    /// Run a single cycle and print the report
    Once(RunArgs),
    /// Show the persisted depth cache
    Cache(CacheArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };
    match &cli.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_writer(std::io::stderr)
                .init();
        }
    }

    match cli.command {
        Commands::Run(args) => commands::run::run(args).await?,
        Commands::Once(args) => commands::run::once(args).await?,
        Commands::Cache(args) => commands::cache::run(args)?,
    }

    Ok(())
}
