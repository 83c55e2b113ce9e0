//! MongoDB change stream replication for iris-sync
//!
//! Provides the per-collection [`ChangeListener`] and the MongoDB-backed
//! [`MongoFeedSource`] it reads from.

mod feed;
mod listener;

pub use feed::{MongoChangeFeed, MongoFeedSource};
pub use listener::{ChangeListener, EventPipeline, ListenerOptions, ListenerState};
