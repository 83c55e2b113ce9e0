//! Storage seams used by the replication pipeline.
//!
//! The listener, applier and retention sweeper only talk to stores through
//! these traits. `iris-sync-mongodb-sink` and
//! `iris-sync-mongodb-changestream-source` implement them on top of the MongoDB
//! driver; [`crate::memory`] provides in-process implementations.

use crate::config::IndexConfig;
use crate::event::{ChangeEvent, DecodeError};
use anyhow::Result;
use async_trait::async_trait;
use bson::{Bson, Document};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Matched/modified counts reported by update and replace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateCounts {
    pub matched: u64,
    pub modified: u64,
}

/// Write access to the replication target.
#[async_trait]
pub trait TargetStore: Send + Sync {
    /// Insert a new document, returning its identity.
    async fn insert_one(&self, collection: &str, document: Document) -> Result<Bson>;

    /// `$set` the given fields on the document with identity `id`.
    async fn update_one(&self, collection: &str, id: &Bson, fields: Document)
        -> Result<UpdateCounts>;

    /// Replace the whole document with identity `id`.
    async fn replace_one(&self, collection: &str, id: &Bson, document: Document)
        -> Result<UpdateCounts>;
}

/// Bulk expiry of aged documents.
#[async_trait]
pub trait RetentionStore: Send + Sync {
    /// Delete every document whose `field` is a date strictly before `cutoff`.
    async fn delete_older_than(
        &self,
        collection: &str,
        field: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<u64>;
}

/// Collection and index management used when preparing the target.
#[async_trait]
pub trait CollectionAdmin: Send + Sync {
    async fn collection_names(&self) -> Result<Vec<String>>;

    async fn create_collection(&self, name: &str) -> Result<()>;

    async fn create_index(&self, collection: &str, index: &IndexConfig) -> Result<()>;
}

/// Options used when opening a change feed.
///
/// Feeds are always opened with full-document lookup for updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedOptions {
    /// Upper bound on how long a single poll may wait for an event.
    pub max_await: Duration,
}

impl Default for FeedOptions {
    fn default() -> Self {
        Self {
            max_await: Duration::from_secs(1),
        }
    }
}

/// One item read from a change feed.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Change(ChangeEvent),
    /// A raw event that could not be decoded. The feed keeps going.
    Undecodable(DecodeError),
}

impl FeedEvent {
    /// Decode a raw change stream document read on `collection`.
    pub fn decode(collection: &str, raw: &Document) -> Self {
        match ChangeEvent::from_change_document(collection, raw) {
            Ok(event) => FeedEvent::Change(event),
            Err(e) => FeedEvent::Undecodable(e),
        }
    }
}

/// Opens live change feeds on source collections.
#[async_trait]
pub trait ChangeFeedSource: Send + Sync {
    /// Open a feed starting at the current position of the collection.
    async fn open(&self, collection: &str, options: &FeedOptions) -> Result<Box<dyn ChangeFeed>>;
}

/// An open change feed cursor.
#[async_trait]
pub trait ChangeFeed: Send {
    /// Wait up to the configured bound for the next event.
    ///
    /// `Ok(None)` means nothing arrived within the bound.
    async fn next_event(&mut self) -> Result<Option<FeedEvent>>;

    /// Whether the cursor can still produce events.
    fn is_alive(&self) -> bool;

    async fn close(&mut self);
}
