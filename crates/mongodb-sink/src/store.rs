//! MongoDB implementations of the target, retention and admin seams.

use anyhow::Result;
use async_trait::async_trait;
use bson::{doc, Bson, Document};
use chrono::{DateTime, Utc};
use mongodb::{options::IndexOptions, results::UpdateResult, Collection, Database, IndexModel};
use replication_core::{CollectionAdmin, IndexConfig, RetentionStore, TargetStore, UpdateCounts};

/// A MongoDB database used as replication target and/or retention subject.
#[derive(Debug, Clone)]
pub struct MongoStore {
    database: Database,
}

impl MongoStore {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.database.collection(name)
    }
}

fn counts(result: UpdateResult) -> UpdateCounts {
    UpdateCounts {
        matched: result.matched_count,
        modified: result.modified_count,
    }
}

/// Build an index model from configured keys and server-style options.
pub fn index_model(index: &IndexConfig) -> Result<IndexModel> {
    let options: Option<IndexOptions> = if index.options.is_empty() {
        None
    } else {
        Some(bson::from_document(index.options.clone()).map_err(|e| {
            anyhow::anyhow!("Invalid index options {}: {e}", index.options)
        })?)
    };

    Ok(IndexModel::builder()
        .keys(index.keys.clone())
        .options(options)
        .build())
}

#[async_trait]
impl TargetStore for MongoStore {
    async fn insert_one(&self, collection: &str, document: Document) -> Result<Bson> {
        let result = self.collection(collection).insert_one(document).await?;
        tracing::trace!("Inserted {} into {collection}", result.inserted_id);
        Ok(result.inserted_id)
    }

    async fn update_one(
        &self,
        collection: &str,
        id: &Bson,
        fields: Document,
    ) -> Result<UpdateCounts> {
        let result = self
            .collection(collection)
            .update_one(doc! { "_id": id.clone() }, doc! { "$set": fields })
            .await?;
        Ok(counts(result))
    }

    async fn replace_one(
        &self,
        collection: &str,
        id: &Bson,
        document: Document,
    ) -> Result<UpdateCounts> {
        let result = self
            .collection(collection)
            .replace_one(doc! { "_id": id.clone() }, document)
            .await?;
        Ok(counts(result))
    }
}

#[async_trait]
impl RetentionStore for MongoStore {
    async fn delete_older_than(
        &self,
        collection: &str,
        field: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<u64> {
        let filter = doc! { field: { "$lt": bson::DateTime::from_chrono(cutoff) } };
        let result = self.collection(collection).delete_many(filter).await?;
        Ok(result.deleted_count)
    }
}

#[async_trait]
impl CollectionAdmin for MongoStore {
    async fn collection_names(&self) -> Result<Vec<String>> {
        Ok(self.database.list_collection_names().await?)
    }

    async fn create_collection(&self, name: &str) -> Result<()> {
        self.database.create_collection(name).await?;
        Ok(())
    }

    async fn create_index(&self, collection: &str, index: &IndexConfig) -> Result<()> {
        let model = index_model(index)?;
        let result = self.collection(collection).create_index(model).await?;
        tracing::debug!("Created index {} on {collection}", result.index_name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_index_model_with_expiry() {
        let index = IndexConfig {
            keys: doc! { "created_at": 1 },
            options: doc! { "expireAfterSeconds": 3600_i64, "name": "created_at_ttl" },
        };
        let model = index_model(&index).unwrap();
        assert_eq!(model.keys, doc! { "created_at": 1 });
        let options = model.options.unwrap();
        assert_eq!(options.expire_after, Some(Duration::from_secs(3600)));
        assert_eq!(options.name.as_deref(), Some("created_at_ttl"));
    }

    #[test]
    fn test_index_model_without_options() {
        let index = IndexConfig {
            keys: doc! { "email": 1 },
            options: Document::new(),
        };
        let model = index_model(&index).unwrap();
        assert!(model.options.is_none());
    }

    #[test]
    fn test_index_model_rejects_bad_options() {
        let index = IndexConfig {
            keys: doc! { "email": 1 },
            options: doc! { "unique": "yes" },
        };
        assert!(index_model(&index).is_err());
    }
}
