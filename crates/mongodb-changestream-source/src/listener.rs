//! Per-collection change listener.
//!
//! Each listener owns one background task that keeps a change feed open on a
//! single source collection and pushes every event through
//! filter -> transform -> apply, strictly in feed order.
//!
//! ```text
//! Connecting --open ok--> Streaming --feed error--> ErrorBackoff --backoff--> Connecting
//!     \__________________________ stop() from any state ___________________> Stopped
//! ```
//!
//! A reconnect always starts a fresh feed at the current position. Events
//! emitted while no feed is open are not replayed.

use anyhow::Result;
use replication_core::{
    ChangeEvent, ChangeFeed, ChangeFeedSource, DecodeError, ErrorKind, FeedEvent, FeedOptions,
    Monitor, OperationFilter, OperationTransformer, TargetApplier,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Connecting,
    Streaming,
    ErrorBackoff,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct ListenerOptions {
    pub feed: FeedOptions,
    /// Pause after a poll that returned nothing.
    pub idle_sleep: Duration,
    /// Pause between a feed error and the reconnect.
    pub error_backoff: Duration,
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self {
            feed: FeedOptions::default(),
            idle_sleep: Duration::from_millis(100),
            error_backoff: Duration::from_secs(5),
        }
    }
}

/// The filter -> transform -> apply chain shared by all listeners.
#[derive(Clone)]
pub struct EventPipeline {
    filter: Arc<OperationFilter>,
    transformer: Arc<OperationTransformer>,
    applier: Arc<TargetApplier>,
    monitor: Arc<dyn Monitor>,
}

impl EventPipeline {
    pub fn new(
        filter: OperationFilter,
        transformer: OperationTransformer,
        applier: TargetApplier,
        monitor: Arc<dyn Monitor>,
    ) -> Self {
        Self {
            filter: Arc::new(filter),
            transformer: Arc::new(transformer),
            applier: Arc::new(applier),
            monitor,
        }
    }

    /// Process one event. Failures are logged and reported, never returned.
    pub async fn process(&self, collection: &str, event: ChangeEvent) {
        let kind = event.kind();

        // Counted before filtering so dropped operations show up in volume.
        self.monitor.record_operation(collection, &kind);

        if !self.filter.should_process(&event) {
            debug!("Filtered out {kind} operation on {collection}");
            return;
        }

        let transformed = self.transformer.transform(&event);

        match self.applier.apply(collection, &transformed).await {
            Ok(applied) => {
                debug!("Successfully applied {kind} to target {collection}: {applied:?}");
            }
            Err(e) => {
                error!("Failed to apply {kind} on {collection}: {e}");
                self.monitor
                    .record_error(collection, ErrorKind::ApplyOperation, &e.to_string());
            }
        }
    }

    /// Report an event the feed could not decode. Its kind is counted when
    /// known; nothing is applied.
    pub fn reject(&self, collection: &str, error: &DecodeError) {
        if let Some(kind) = error.kind() {
            self.monitor.record_operation(collection, kind);
        }
        warn!("Skipping undecodable change event on {collection}: {error}");
        self.monitor
            .record_error(collection, ErrorKind::DecodeEvent, &error.to_string());
    }
}

/// Background consumer of one collection's change feed.
pub struct ChangeListener {
    collection: String,
    source: Arc<dyn ChangeFeedSource>,
    pipeline: EventPipeline,
    options: ListenerOptions,
    cancel: CancellationToken,
    state: watch::Receiver<ListenerState>,
    state_tx: Option<watch::Sender<ListenerState>>,
    handle: Option<JoinHandle<()>>,
}

impl ChangeListener {
    pub fn new(
        collection: impl Into<String>,
        source: Arc<dyn ChangeFeedSource>,
        pipeline: EventPipeline,
        options: ListenerOptions,
    ) -> Self {
        let (state_tx, state) = watch::channel(ListenerState::Connecting);
        Self {
            collection: collection.into(),
            source,
            pipeline,
            options,
            cancel: CancellationToken::new(),
            state,
            state_tx: Some(state_tx),
            handle: None,
        }
    }

    /// Tie this listener to an outer cancellation signal.
    pub fn with_cancellation(mut self, parent: &CancellationToken) -> Self {
        self.cancel = parent.child_token();
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn state(&self) -> ListenerState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ListenerState> {
        self.state.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
            && self
                .handle
                .as_ref()
                .is_some_and(|handle| !handle.is_finished())
    }

    /// Spawn the background consumer. Must be called once, from within a
    /// tokio runtime.
    pub fn start(&mut self) {
        let Some(state) = self.state_tx.take() else {
            error!(
                "Change stream listener for {} was already started or stopped",
                self.collection
            );
            return;
        };

        let worker = Worker {
            collection: self.collection.clone(),
            source: Arc::clone(&self.source),
            pipeline: self.pipeline.clone(),
            options: self.options.clone(),
            cancel: self.cancel.clone(),
            state,
        };
        self.handle = Some(tokio::spawn(worker.run()));
    }

    /// Cancel the consumer and wait for it to exit.
    ///
    /// A pending poll or sleep is abandoned immediately; an apply that is
    /// already running completes first.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        // Never started: no worker will publish the final state.
        if let Some(state) = self.state_tx.take() {
            state.send_replace(ListenerState::Stopped);
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!(
                    "Change stream listener for {} exited abnormally: {e}",
                    self.collection
                );
            }
        }
    }
}

struct Worker {
    collection: String,
    source: Arc<dyn ChangeFeedSource>,
    pipeline: EventPipeline,
    options: ListenerOptions,
    cancel: CancellationToken,
    state: watch::Sender<ListenerState>,
}

impl Worker {
    async fn run(self) {
        info!("Starting change stream listener for {}", self.collection);

        while !self.cancel.is_cancelled() {
            self.state.send_replace(ListenerState::Connecting);

            let opened = tokio::select! {
                _ = self.cancel.cancelled() => break,
                opened = self.source.open(&self.collection, &self.options.feed) => opened,
            };

            let mut feed = match opened {
                Ok(feed) => feed,
                Err(e) => {
                    self.backoff(e).await;
                    continue;
                }
            };

            self.state.send_replace(ListenerState::Streaming);
            match self.consume(feed.as_mut()).await {
                Ok(()) => {
                    if !self.cancel.is_cancelled() {
                        debug!("Change stream on {} closed, reopening", self.collection);
                        self.pause(self.options.idle_sleep).await;
                    }
                }
                Err(e) => self.backoff(e).await,
            }
            feed.close().await;
        }

        self.state.send_replace(ListenerState::Stopped);
        info!("Change stream listener stopped for {}", self.collection);
    }

    /// Pull events until the feed dies, fails or the listener is cancelled.
    async fn consume(&self, feed: &mut dyn ChangeFeed) -> Result<()> {
        while feed.is_alive() {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                next = feed.next_event() => next?,
            };

            match next {
                Some(FeedEvent::Change(event)) => {
                    self.pipeline.process(&self.collection, event).await
                }
                Some(FeedEvent::Undecodable(e)) => self.pipeline.reject(&self.collection, &e),
                None => {
                    if !self.pause(self.options.idle_sleep).await {
                        return Ok(());
                    }
                }
            }
        }
        Ok(())
    }

    async fn backoff(&self, error: anyhow::Error) {
        let message = format!("{error:#}");
        error!("Change stream error on {}: {message}", self.collection);
        self.pipeline
            .monitor
            .record_error(&self.collection, ErrorKind::ChangeStream, &message);

        self.state.send_replace(ListenerState::ErrorBackoff);
        self.pause(self.options.error_backoff).await;
    }

    /// Sleep unless cancelled first. Returns false on cancellation.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}
