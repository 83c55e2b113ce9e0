//! Scheduled retention sweeper.
//!
//! One cycle walks every configured collection on the source side and then on
//! the target side. Between cycles the sweeper sleeps in increments so a stop
//! request is noticed without waiting out the whole interval. A cycle that is
//! already deleting is never interrupted.

use crate::policy::RetentionPolicy;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use replication_core::{CollectionConfig, RetentionStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// One store swept by the sweeper, with its retention window.
#[derive(Clone)]
pub struct RetentionSide {
    pub name: String,
    pub store: Arc<dyn RetentionStore>,
    pub retention_days: u32,
}

impl RetentionSide {
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn RetentionStore>,
        retention_days: u32,
    ) -> Self {
        Self {
            name: name.into(),
            store,
            retention_days,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SweeperOptions {
    /// Length of one cancellable sleep between cycles.
    pub sleep_increment: Duration,
    /// Sleeps per cycle.
    pub increments_per_cycle: u32,
    /// How long `stop()` waits for the task to exit.
    pub join_timeout: Duration,
}

impl Default for SweeperOptions {
    fn default() -> Self {
        Self {
            sleep_increment: Duration::from_secs(3600),
            increments_per_cycle: 24,
            join_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweptCollection {
    pub side: String,
    pub collection: String,
    pub deleted: u64,
}

/// Outcome of one sweep cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub swept: Vec<SweptCollection>,
    /// `(side, collection)` pairs without a retention field.
    pub skipped: Vec<(String, String)>,
}

impl SweepReport {
    pub fn total_deleted(&self) -> u64 {
        self.swept.iter().map(|swept| swept.deleted).sum()
    }
}

struct SweepPlan {
    collections: Vec<CollectionConfig>,
    sides: [RetentionSide; 2],
}

impl SweepPlan {
    async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        for side in &self.sides {
            for collection in &self.collections {
                let Some(policy) = RetentionPolicy::resolve(collection, side.retention_days)
                else {
                    warn!(
                        "No retention field configured for {} collection {}, skipping",
                        side.name, collection.name
                    );
                    report
                        .skipped
                        .push((side.name.clone(), collection.name.clone()));
                    continue;
                };

                let cutoff = policy.cutoff(now);
                let deleted = side
                    .store
                    .delete_older_than(&policy.collection, &policy.field, cutoff)
                    .await
                    .with_context(|| {
                        format!(
                            "Retention sweep failed on {} collection {}",
                            side.name, policy.collection
                        )
                    })?;

                info!(
                    "Deleted {deleted} documents older than {cutoff} from {} collection {}",
                    side.name, policy.collection
                );
                report.swept.push(SweptCollection {
                    side: side.name.clone(),
                    collection: policy.collection,
                    deleted,
                });
            }
        }

        Ok(report)
    }
}

/// Periodic deletion of expired documents on both stores.
pub struct RetentionSweeper {
    plan: Arc<SweepPlan>,
    options: SweeperOptions,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl RetentionSweeper {
    pub fn new(
        collections: Vec<CollectionConfig>,
        source: RetentionSide,
        target: RetentionSide,
        options: SweeperOptions,
    ) -> Self {
        Self {
            plan: Arc::new(SweepPlan {
                collections,
                sides: [source, target],
            }),
            options,
            cancel: CancellationToken::new(),
            handle: None,
        }
    }

    pub fn with_cancellation(mut self, parent: &CancellationToken) -> Self {
        self.cancel = parent.child_token();
        self
    }

    /// Run one full cycle now. The first failing collection aborts the cycle.
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        self.plan.sweep(Utc::now()).await
    }

    /// Run one full cycle as if the current time were `now`.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        self.plan.sweep(now).await
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Spawn the sweep loop. The first cycle runs immediately.
    pub fn start(&mut self) {
        if self.handle.is_some() {
            error!("Retention sweeper was already started");
            return;
        }

        let plan = Arc::clone(&self.plan);
        let options = self.options.clone();
        let cancel = self.cancel.clone();

        self.handle = Some(tokio::spawn(async move {
            info!("Starting retention sweeper");

            'cycles: while !cancel.is_cancelled() {
                match plan.sweep(Utc::now()).await {
                    Ok(report) => info!(
                        "Retention sweep completed: {} documents deleted",
                        report.total_deleted()
                    ),
                    Err(e) => error!("Retention sweep aborted: {e:#}"),
                }

                for _ in 0..options.increments_per_cycle {
                    tokio::select! {
                        _ = cancel.cancelled() => break 'cycles,
                        _ = tokio::time::sleep(options.sleep_increment) => {}
                    }
                }
            }

            info!("Retention sweeper stopped");
        }));
    }

    /// Signal the loop to stop and wait up to the join timeout for it.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        let Some(handle) = self.handle.take() else {
            return;
        };

        match tokio::time::timeout(self.options.join_timeout, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Retention sweeper exited abnormally: {e}"),
            Err(_) => warn!(
                "Retention sweeper did not stop within {:?}",
                self.options.join_timeout
            ),
        }
    }
}
