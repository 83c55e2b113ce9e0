//! Applies transformed operations to the target store.

use crate::event::{Operation, OperationKind};
use crate::store::{TargetStore, UpdateCounts};
use crate::transform::TransformedOperation;
use bson::Bson;
use std::sync::Arc;

/// Successful outcome of applying one operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    Inserted { id: Bson },
    Matched { matched: u64, modified: u64 },
}

impl From<UpdateCounts> for Applied {
    fn from(counts: UpdateCounts) -> Self {
        Applied::Matched {
            matched: counts.matched,
            modified: counts.modified,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApplyError {
    #[error("Unsupported operation type: {kind}")]
    Unsupported { kind: OperationKind },

    #[error("{message}")]
    Store { message: String },
}

pub type ApplyResult = Result<Applied, ApplyError>;

/// Translates one transformed operation into a single target mutation.
///
/// Store failures are returned as [`ApplyError::Store`]; nothing is retried.
#[derive(Clone)]
pub struct TargetApplier {
    target: Arc<dyn TargetStore>,
}

impl TargetApplier {
    pub fn new(target: Arc<dyn TargetStore>) -> Self {
        Self { target }
    }

    pub async fn apply(&self, collection: &str, operation: &TransformedOperation) -> ApplyResult {
        let result = match &operation.event.operation {
            Operation::Insert { document, .. } => self
                .target
                .insert_one(collection, document.clone())
                .await
                .map(|id| Applied::Inserted { id }),
            Operation::Update { id, update, .. } => {
                if update.updated_fields.is_empty() {
                    tracing::debug!("Update of {id} in {collection} has no updated fields");
                    return Ok(Applied::from(UpdateCounts::default()));
                }
                self.target
                    .update_one(collection, id, update.updated_fields.clone())
                    .await
                    .map(Applied::from)
            }
            Operation::Replace { id, document } => self
                .target
                .replace_one(collection, id, document.clone())
                .await
                .map(Applied::from),
            Operation::Delete { .. } | Operation::Other { .. } => {
                return Err(ApplyError::Unsupported {
                    kind: operation.kind(),
                });
            }
        };

        result.map_err(|e| {
            tracing::debug!("Failed to apply operation to target {collection}: {e:#}");
            ApplyError::Store {
                message: format!("{e:#}"),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ChangeEvent, UpdateDescription};
    use crate::memory::MemoryStore;
    use crate::transform::{OperationTransformer, DEFAULT_METADATA_FIELD};
    use bson::doc;

    fn applier(store: &MemoryStore) -> TargetApplier {
        TargetApplier::new(Arc::new(store.clone()))
    }

    fn transform(event: ChangeEvent) -> TransformedOperation {
        OperationTransformer::default().transform(&event)
    }

    #[tokio::test]
    async fn test_insert_creates_document() {
        let store = MemoryStore::new();
        let op = transform(ChangeEvent::new(
            "orders",
            Operation::Insert {
                id: Bson::Int32(1),
                document: doc! { "_id": 1, "a": 1 },
            },
        ));

        let applied = applier(&store).apply("orders", &op).await.unwrap();
        assert_eq!(applied, Applied::Inserted { id: Bson::Int32(1) });

        let documents = store.documents("orders");
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].get_i32("a").unwrap(), 1);
        // The snapshot carried the metadata, so the stored copy has it too.
        assert!(documents[0].contains_key(DEFAULT_METADATA_FIELD));
        assert!(op
            .event
            .document()
            .unwrap()
            .contains_key(DEFAULT_METADATA_FIELD));
    }

    #[tokio::test]
    async fn test_update_merges_fields() {
        let store = MemoryStore::new();
        store.seed("orders", vec![doc! { "_id": 1, "a": 1, "b": 2 }]);

        let op = transform(ChangeEvent::new(
            "orders",
            Operation::Update {
                id: Bson::Int32(1),
                update: UpdateDescription {
                    updated_fields: doc! { "b": 5 },
                },
                document: Some(doc! { "_id": 1, "a": 1, "b": 5 }),
            },
        ));

        let applied = applier(&store).apply("orders", &op).await.unwrap();
        assert_eq!(
            applied,
            Applied::Matched {
                matched: 1,
                modified: 1
            }
        );
        assert_eq!(
            store.find("orders", &Bson::Int32(1)).unwrap(),
            doc! { "_id": 1, "a": 1, "b": 5 }
        );
    }

    #[tokio::test]
    async fn test_update_without_fields_is_a_noop() {
        let store = MemoryStore::new();
        store.seed("orders", vec![doc! { "_id": 1, "a": 1 }]);
        let op = transform(ChangeEvent::new(
            "orders",
            Operation::Update {
                id: Bson::Int32(1),
                update: UpdateDescription::default(),
                document: None,
            },
        ));

        let applied = applier(&store).apply("orders", &op).await.unwrap();
        assert_eq!(
            applied,
            Applied::Matched {
                matched: 0,
                modified: 0
            }
        );
        assert_eq!(store.documents("orders"), vec![doc! { "_id": 1, "a": 1 }]);
    }

    #[tokio::test]
    async fn test_replace_swaps_whole_document() {
        let store = MemoryStore::new();
        store.seed("orders", vec![doc! { "_id": 1, "a": 1, "b": 2 }]);

        let op = OperationTransformer::new("_meta").transform(&ChangeEvent::new(
            "orders",
            Operation::Replace {
                id: Bson::Int32(1),
                document: doc! { "_id": 1, "c": 3 },
            },
        ));

        let applied = applier(&store).apply("orders", &op).await.unwrap();
        assert_eq!(
            applied,
            Applied::Matched {
                matched: 1,
                modified: 1
            }
        );
        let stored = store.find("orders", &Bson::Int32(1)).unwrap();
        assert!(!stored.contains_key("a"));
        assert_eq!(stored.get_i32("c").unwrap(), 3);
        assert!(stored.contains_key("_meta"));
    }

    #[tokio::test]
    async fn test_delete_is_rejected_without_mutation() {
        let store = MemoryStore::new();
        store.seed("orders", vec![doc! { "_id": 1 }]);
        let op = transform(ChangeEvent::new(
            "orders",
            Operation::Delete { id: Bson::Int32(1) },
        ));

        let err = applier(&store).apply("orders", &op).await.unwrap_err();
        assert_eq!(
            err,
            ApplyError::Unsupported {
                kind: OperationKind::Delete
            }
        );
        assert_eq!(err.to_string(), "Unsupported operation type: delete");
        assert_eq!(store.documents("orders"), vec![doc! { "_id": 1 }]);
    }

    #[tokio::test]
    async fn test_unknown_kind_is_rejected() {
        let store = MemoryStore::new();
        let op = transform(ChangeEvent::new(
            "orders",
            Operation::Other {
                kind: "rename".into(),
                id: None,
            },
        ));

        let err = applier(&store).apply("orders", &op).await.unwrap_err();
        assert_eq!(err.to_string(), "Unsupported operation type: rename");
    }

    #[tokio::test]
    async fn test_store_errors_become_results() {
        let store = MemoryStore::new();
        store.seed("orders", vec![doc! { "_id": 1 }]);
        let op = transform(ChangeEvent::new(
            "orders",
            Operation::Insert {
                id: Bson::Int32(1),
                document: doc! { "_id": 1 },
            },
        ));

        // Duplicate key.
        let err = applier(&store).apply("orders", &op).await.unwrap_err();
        assert!(matches!(err, ApplyError::Store { ref message } if message.contains("duplicate key")));

        store.set_unavailable(true);
        let op = transform(ChangeEvent::new(
            "orders",
            Operation::Replace {
                id: Bson::Int32(1),
                document: doc! { "_id": 1, "x": 1 },
            },
        ));
        let err = applier(&store).apply("orders", &op).await.unwrap_err();
        assert!(matches!(err, ApplyError::Store { .. }));
        assert_eq!(store.documents("orders"), vec![doc! { "_id": 1 }]);
    }
}
