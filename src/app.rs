//! Wiring of stores, listeners, sweeper and metrics for the `run` and
//! `sweep-once` commands.

use crate::config::metrics_interval;
use crate::controller::ReplicationController;
use anyhow::{Context, Result};
use iris_sync_mongodb_changestream_source::MongoFeedSource;
use iris_sync_mongodb_sink::{mongo_connect, MongoStore};
use replication_core::{IrisConfig, MonitoringService, RetentionStore};
use retention::{RetentionSide, RetentionSweeper, SweeperOptions};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Connected source and target databases.
pub struct Stores {
    pub source: MongoStore,
    pub target: MongoStore,
}

/// Connect to both databases. Either connection failing is fatal.
pub async fn connect_stores(config: &IrisConfig) -> Result<Stores> {
    let source = mongo_connect(&config.source.uri, &config.source.database)
        .await
        .context("Failed to connect to source MongoDB")?;
    let target = mongo_connect(&config.target.uri, &config.target.database)
        .await
        .context("Failed to connect to target MongoDB")?;

    Ok(Stores {
        source: MongoStore::new(source),
        target: MongoStore::new(target),
    })
}

pub fn build_sweeper(
    config: &IrisConfig,
    source: Arc<dyn RetentionStore>,
    target: Arc<dyn RetentionStore>,
) -> RetentionSweeper {
    RetentionSweeper::new(
        config.replication.collections.clone(),
        RetentionSide::new("source", source, config.source.retention_days),
        RetentionSide::new("target", target, config.target.retention_days),
        SweeperOptions::default(),
    )
}

/// Replicate until `shutdown` resolves, then stop the sweeper and the
/// listeners in that order.
pub async fn run_replication<F>(config: IrisConfig, stores: Stores, shutdown: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    let cancel = CancellationToken::new();
    let monitor = Arc::new(MonitoringService::new());

    let metrics = match &config.monitoring.metrics_file {
        Some(path) => {
            let interval = metrics_interval(&config)?;
            info!(
                "Writing metrics to {} every {interval:?}",
                path.display()
            );
            Some(monitor.start_emission_task(path.clone(), interval, cancel.child_token()))
        }
        None => None,
    };

    let target = Arc::new(stores.target);
    let mut controller = ReplicationController::new(
        &config,
        Arc::new(MongoFeedSource::new(stores.source.database().clone())),
        target.clone(),
        target.clone(),
        monitor.clone(),
    );
    controller
        .start()
        .await
        .context("Failed to start replication")?;

    let mut sweeper =
        build_sweeper(&config, Arc::new(stores.source), target).with_cancellation(&cancel);
    sweeper.start();

    info!(
        "Replicating {} collections from {} to {}",
        config.replication.collections.len(),
        config.source.database,
        config.target.database
    );

    let signal = shutdown.await;
    info!("Shutting down");

    sweeper.stop().await;
    controller.stop().await;
    cancel.cancel();

    if let Some(handle) = metrics {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Metrics emission failed: {e:#}"),
            Err(e) => error!("Metrics emission task panicked: {e}"),
        }
    }

    signal.context("Failed to wait for shutdown signal")
}
