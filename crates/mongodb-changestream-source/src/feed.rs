//! Change feeds backed by MongoDB change streams.

use anyhow::Result;
use async_trait::async_trait;
use bson::Document;
use mongodb::{
    change_stream::ChangeStream,
    options::{ChangeStreamOptions, FullDocumentType},
    Database,
};
use replication_core::{ChangeFeed, ChangeFeedSource, FeedEvent, FeedOptions};
use tracing::debug;

/// Opens collection-level change streams on a source database.
#[derive(Debug, Clone)]
pub struct MongoFeedSource {
    database: Database,
}

impl MongoFeedSource {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl ChangeFeedSource for MongoFeedSource {
    async fn open(&self, collection: &str, options: &FeedOptions) -> Result<Box<dyn ChangeFeed>> {
        let stream_options = ChangeStreamOptions::builder()
            .full_document(Some(FullDocumentType::UpdateLookup))
            .max_await_time(Some(options.max_await))
            .build();

        // No resume token: every open starts from the current position.
        let stream = self
            .database
            .collection::<Document>(collection)
            .watch()
            .with_options(stream_options)
            .await?
            .with_type::<Document>();

        debug!(
            "Opened change stream on {}.{}",
            self.database.name(),
            collection
        );

        Ok(Box::new(MongoChangeFeed {
            collection: collection.to_string(),
            stream: Some(stream),
        }))
    }
}

/// An open change stream cursor.
///
/// Events are read as raw documents and decoded into [`FeedEvent`]s.
/// Events that cannot be decoded are returned as [`FeedEvent::Undecodable`]
/// so the caller can report them.
pub struct MongoChangeFeed {
    collection: String,
    stream: Option<ChangeStream<Document>>,
}

#[async_trait]
impl ChangeFeed for MongoChangeFeed {
    async fn next_event(&mut self) -> Result<Option<FeedEvent>> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(None);
        };

        // Returns after at most one getMore, bounded by maxAwaitTimeMS.
        let Some(raw) = stream.next_if_any().await? else {
            return Ok(None);
        };

        Ok(Some(FeedEvent::decode(&self.collection, &raw)))
    }

    fn is_alive(&self) -> bool {
        self.stream.as_ref().is_some_and(|stream| stream.is_alive())
    }

    async fn close(&mut self) {
        // Dropping the stream kills the server-side cursor.
        if self.stream.take().is_some() {
            debug!("Closed change stream on {}", self.collection);
        }
    }
}
