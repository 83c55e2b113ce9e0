//! In-process store and feed implementations.
//!
//! Used by tests across the workspace.

use crate::config::IndexConfig;
use crate::event::ChangeEvent;
use crate::store::{
    ChangeFeed, ChangeFeedSource, CollectionAdmin, FeedEvent, FeedOptions, RetentionStore,
    TargetStore, UpdateCounts,
};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use bson::{oid::ObjectId, Bson, Document};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;

/// Collections of documents held in memory.
///
/// Clones share the same data, so one handle can be given to the code under
/// test and another kept for assertions.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    collections: Arc<Mutex<BTreeMap<String, Vec<Document>>>>,
    indexes: Arc<Mutex<BTreeMap<String, Vec<IndexConfig>>>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn collections(&self) -> MutexGuard<'_, BTreeMap<String, Vec<Document>>> {
        self.collections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("connection refused: store unavailable");
        }
        Ok(())
    }

    /// Make every store call fail until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn seed(&self, collection: &str, documents: Vec<Document>) {
        self.collections()
            .entry(collection.to_string())
            .or_default()
            .extend(documents);
    }

    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.collections()
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    pub fn find(&self, collection: &str, id: &Bson) -> Option<Document> {
        self.collections()
            .get(collection)?
            .iter()
            .find(|doc| doc.get("_id") == Some(id))
            .cloned()
    }

    pub fn indexes(&self, collection: &str) -> Vec<IndexConfig> {
        self.indexes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl TargetStore for MemoryStore {
    async fn insert_one(&self, collection: &str, mut document: Document) -> Result<Bson> {
        self.check_available()?;

        let id = match document.get("_id") {
            Some(id) => id.clone(),
            None => {
                let id = Bson::ObjectId(ObjectId::new());
                document.insert("_id", id.clone());
                id
            }
        };

        let mut collections = self.collections();
        let documents = collections.entry(collection.to_string()).or_default();
        if documents.iter().any(|doc| doc.get("_id") == Some(&id)) {
            bail!("E11000 duplicate key error collection: {collection} dup key: {{ _id: {id} }}");
        }
        documents.push(document);
        Ok(id)
    }

    async fn update_one(
        &self,
        collection: &str,
        id: &Bson,
        fields: Document,
    ) -> Result<UpdateCounts> {
        self.check_available()?;

        let mut collections = self.collections();
        let Some(document) = collections
            .get_mut(collection)
            .and_then(|docs| docs.iter_mut().find(|doc| doc.get("_id") == Some(id)))
        else {
            return Ok(UpdateCounts::default());
        };

        let mut modified = false;
        for (key, value) in fields {
            if document.get(&key) != Some(&value) {
                document.insert(key, value);
                modified = true;
            }
        }

        Ok(UpdateCounts {
            matched: 1,
            modified: u64::from(modified),
        })
    }

    async fn replace_one(
        &self,
        collection: &str,
        id: &Bson,
        document: Document,
    ) -> Result<UpdateCounts> {
        self.check_available()?;

        let mut replacement = Document::new();
        replacement.insert("_id", id.clone());
        for (key, value) in document {
            if key != "_id" {
                replacement.insert(key, value);
            }
        }

        let mut collections = self.collections();
        let Some(existing) = collections
            .get_mut(collection)
            .and_then(|docs| docs.iter_mut().find(|doc| doc.get("_id") == Some(id)))
        else {
            return Ok(UpdateCounts::default());
        };

        let modified = *existing != replacement;
        *existing = replacement;
        Ok(UpdateCounts {
            matched: 1,
            modified: u64::from(modified),
        })
    }
}

#[async_trait]
impl RetentionStore for MemoryStore {
    async fn delete_older_than(
        &self,
        collection: &str,
        field: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<u64> {
        self.check_available()?;

        let cutoff = bson::DateTime::from_chrono(cutoff);
        let mut collections = self.collections();
        let Some(documents) = collections.get_mut(collection) else {
            return Ok(0);
        };

        let before = documents.len();
        // Like `$lt` on a date, only date-typed values are compared.
        documents.retain(|doc| !matches!(doc.get(field), Some(Bson::DateTime(dt)) if *dt < cutoff));
        Ok((before - documents.len()) as u64)
    }
}

#[async_trait]
impl CollectionAdmin for MemoryStore {
    async fn collection_names(&self) -> Result<Vec<String>> {
        self.check_available()?;
        Ok(self.collections().keys().cloned().collect())
    }

    async fn create_collection(&self, name: &str) -> Result<()> {
        self.check_available()?;
        let mut collections = self.collections();
        if collections.contains_key(name) {
            bail!("Collection already exists. NS: {name}");
        }
        collections.insert(name.to_string(), Vec::new());
        Ok(())
    }

    async fn create_index(&self, collection: &str, index: &IndexConfig) -> Result<()> {
        self.check_available()?;
        let mut indexes = self
            .indexes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let existing = indexes.entry(collection.to_string()).or_default();
        if !existing.contains(index) {
            existing.push(index.clone());
        }
        Ok(())
    }
}

type Scripted = std::result::Result<FeedEvent, String>;

/// Scripted change feed source.
///
/// Events and errors pushed into the source are delivered, in order, to
/// whichever feed is currently open. An error item fails that feed's poll the
/// way a dropped connection would.
#[derive(Clone)]
pub struct MemoryFeedSource {
    sender: mpsc::UnboundedSender<Scripted>,
    receiver: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Scripted>>>,
    opens: Arc<AtomicUsize>,
    failing_opens: Arc<AtomicUsize>,
}

impl Default for MemoryFeedSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFeedSource {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
            opens: Arc::new(AtomicUsize::new(0)),
            failing_opens: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn push(&self, event: ChangeEvent) {
        // The receiver lives as long as `self`.
        let _ = self.sender.send(Ok(FeedEvent::Change(event)));
    }

    /// Queue a raw change stream document, decoded the way a live feed would.
    pub fn push_raw(&self, collection: &str, raw: &Document) {
        let _ = self.sender.send(Ok(FeedEvent::decode(collection, raw)));
    }

    pub fn push_error(&self, message: impl Into<String>) {
        let _ = self.sender.send(Err(message.into()));
    }

    /// Make the next `count` calls to `open` fail.
    pub fn fail_next_opens(&self, count: usize) {
        self.failing_opens.store(count, Ordering::SeqCst);
    }

    /// Number of successful `open` calls so far.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChangeFeedSource for MemoryFeedSource {
    async fn open(&self, collection: &str, options: &FeedOptions) -> Result<Box<dyn ChangeFeed>> {
        let failing = self
            .failing_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            bail!("failed to open change stream on {collection}: connection refused");
        }

        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryFeed {
            receiver: Arc::clone(&self.receiver),
            max_await: options.max_await,
            alive: true,
        }))
    }
}

struct MemoryFeed {
    receiver: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Scripted>>>,
    max_await: Duration,
    alive: bool,
}

#[async_trait]
impl ChangeFeed for MemoryFeed {
    async fn next_event(&mut self) -> Result<Option<FeedEvent>> {
        if !self.alive {
            return Ok(None);
        }

        let mut receiver = self.receiver.lock().await;
        match tokio::time::timeout(self.max_await, receiver.recv()).await {
            Err(_) => Ok(None),
            Ok(None) => {
                self.alive = false;
                Ok(None)
            }
            Ok(Some(Ok(item))) => Ok(Some(item)),
            Ok(Some(Err(message))) => Err(anyhow!(message)),
        }
    }

    fn is_alive(&self) -> bool {
        self.alive
    }

    async fn close(&mut self) {
        self.alive = false;
    }
}
