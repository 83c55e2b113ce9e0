//! Orchestration of the per-collection listeners.

use anyhow::{Context, Result};
use iris_sync_mongodb_changestream_source::{
    ChangeListener, EventPipeline, ListenerOptions, ListenerState,
};
use replication_core::{
    ChangeFeedSource, CollectionAdmin, CollectionConfig, IrisConfig, Monitor, OperationFilter,
    OperationTransformer, TargetApplier, TargetStore,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Owns one [`ChangeListener`] per configured collection.
pub struct ReplicationController {
    collections: Vec<CollectionConfig>,
    source: Arc<dyn ChangeFeedSource>,
    admin: Arc<dyn CollectionAdmin>,
    pipeline: EventPipeline,
    options: ListenerOptions,
    cancel: CancellationToken,
    listeners: Vec<ChangeListener>,
}

impl ReplicationController {
    pub fn new(
        config: &IrisConfig,
        source: Arc<dyn ChangeFeedSource>,
        target: Arc<dyn TargetStore>,
        admin: Arc<dyn CollectionAdmin>,
        monitor: Arc<dyn Monitor>,
    ) -> Self {
        let pipeline = EventPipeline::new(
            OperationFilter::new(config.excluded_operations().iter().cloned()),
            OperationTransformer::new(config.replication.metadata_field.clone()),
            TargetApplier::new(target),
            monitor,
        );

        Self {
            collections: config.replication.collections.clone(),
            source,
            admin,
            pipeline,
            options: ListenerOptions::default(),
            cancel: CancellationToken::new(),
            listeners: Vec::new(),
        }
    }

    pub fn with_listener_options(mut self, options: ListenerOptions) -> Self {
        self.options = options;
        self
    }

    /// Create missing target collections and their configured indexes.
    pub async fn prepare_target(&self) -> Result<()> {
        let existing = self
            .admin
            .collection_names()
            .await
            .context("Failed to list target collections")?;

        for collection in &self.collections {
            if !existing.contains(&collection.name) {
                self.admin
                    .create_collection(&collection.name)
                    .await
                    .with_context(|| {
                        format!("Failed to create target collection {}", collection.name)
                    })?;
                info!("Created target collection {}", collection.name);
            }

            for index in &collection.indexes {
                self.admin
                    .create_index(&collection.name, index)
                    .await
                    .with_context(|| {
                        format!(
                            "Failed to create index {} on {}",
                            index.keys, collection.name
                        )
                    })?;
            }
        }

        Ok(())
    }

    /// Prepare the target, then start one listener per collection.
    pub async fn start(&mut self) -> Result<()> {
        if !self.listeners.is_empty() {
            anyhow::bail!("Replication is already running");
        }

        self.prepare_target().await?;

        for collection in &self.collections {
            let mut listener = ChangeListener::new(
                collection.name.clone(),
                Arc::clone(&self.source),
                self.pipeline.clone(),
                self.options.clone(),
            )
            .with_cancellation(&self.cancel);
            listener.start();
            self.listeners.push(listener);
        }

        info!(
            "Started change stream listeners for {} collections",
            self.listeners.len()
        );
        Ok(())
    }

    /// Stop every listener and wait for all of them to exit.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        futures::future::join_all(self.listeners.iter_mut().map(|l| l.stop())).await;
        self.listeners.clear();
        info!("Replication stopped");
    }

    pub fn listener_states(&self) -> Vec<(String, ListenerState)> {
        self.listeners
            .iter()
            .map(|l| (l.collection().to_string(), l.state()))
            .collect()
    }
}
