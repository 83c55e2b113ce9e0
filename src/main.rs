//! Command-line interface for iris-sync
//!
//! # Usage Examples
//!
//! ```bash
//! # Replicate the configured collections until Ctrl+C / SIGTERM
//! iris-sync --config config/config.yaml
//!
//! # Check a configuration file without connecting anywhere
//! iris-sync -c config/config.yaml check-config
//!
//! # Run one retention cycle on both databases and exit
//! IRIS_CONFIG=config/config.yaml iris-sync sweep-once
//! ```
//!
//! Log verbosity comes from `RUST_LOG` when set, otherwise from
//! `monitoring.log_level` in the configuration file.

use clap::{Parser, Subcommand};
use iris_sync::{build_sweeper, connect_stores, load_config, metrics_interval, run_replication};
use replication_core::IrisConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "iris-sync")]
#[command(about = "Replicate MongoDB collections to a target database with retention sweeps")]
#[command(long_about = None)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(
        short,
        long,
        default_value = "config/config.yaml",
        env = "IRIS_CONFIG",
        global = true
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Replicate until interrupted (default)
    Run,

    /// Validate the configuration file and print a summary
    CheckConfig,

    /// Run a single retention sweep on source and target, then exit
    SweepOnce,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    init_tracing(config.monitoring.log_level.as_deref());

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let stores = connect_stores(&config).await?;
            run_replication(config, stores, shutdown_signal()).await?;
        }
        Commands::CheckConfig => print_summary(&config)?,
        Commands::SweepOnce => {
            let stores = connect_stores(&config).await?;
            let sweeper =
                build_sweeper(&config, Arc::new(stores.source), Arc::new(stores.target));
            let report = sweeper.sweep_once().await?;
            for swept in &report.swept {
                println!(
                    "{} {}: {} documents deleted",
                    swept.side, swept.collection, swept.deleted
                );
            }
            for (side, collection) in &report.skipped {
                println!("{side} {collection}: skipped, no retention field");
            }
        }
    }

    Ok(())
}

fn init_tracing(log_level: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.unwrap_or("info")));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn print_summary(config: &IrisConfig) -> anyhow::Result<()> {
    println!(
        "source: {} (retention {} days)",
        config.source.database, config.source.retention_days
    );
    println!(
        "target: {} (retention {} days)",
        config.target.database, config.target.retention_days
    );
    for collection in &config.replication.collections {
        match collection.retention_field() {
            Some(field) => println!("collection {}: retention on {field}", collection.name),
            None => println!("collection {}: no retention field", collection.name),
        }
    }
    if !config.excluded_operations().is_empty() {
        let excluded: Vec<String> = config
            .excluded_operations()
            .iter()
            .map(|kind| kind.to_string())
            .collect();
        println!("excluded operations: {}", excluded.join(", "));
    }
    if let Some(path) = &config.monitoring.metrics_file {
        println!(
            "metrics: {} every {:?}",
            path.display(),
            metrics_interval(config)?
        );
    }
    println!("Configuration OK");
    Ok(())
}

async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;

    Ok(())
}
