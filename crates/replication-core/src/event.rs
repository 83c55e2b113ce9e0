//! Change events as delivered by a source change feed.
//!
//! A change event is decoded from the raw change stream document into a closed
//! set of operations. Fields that an operation cannot be applied without are
//! validated here, so the rest of the pipeline never has to inspect loosely
//! shaped documents.

use bson::{Bson, Document, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of mutation carried by a change event.
///
/// Parsed from (and displayed as) the lowercase names used by MongoDB change
/// streams. Names outside the replicated set are kept verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OperationKind {
    Insert,
    Update,
    Replace,
    Delete,
    Other(String),
}

impl OperationKind {
    pub fn as_str(&self) -> &str {
        match self {
            OperationKind::Insert => "insert",
            OperationKind::Update => "update",
            OperationKind::Replace => "replace",
            OperationKind::Delete => "delete",
            OperationKind::Other(name) => name,
        }
    }
}

impl From<&str> for OperationKind {
    fn from(name: &str) -> Self {
        match name {
            "insert" => OperationKind::Insert,
            "update" => OperationKind::Update,
            "replace" => OperationKind::Replace,
            "delete" => OperationKind::Delete,
            other => OperationKind::Other(other.to_string()),
        }
    }
}

impl From<String> for OperationKind {
    fn from(name: String) -> Self {
        OperationKind::from(name.as_str())
    }
}

impl From<OperationKind> for String {
    fn from(kind: OperationKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Field-level changes of an update event.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UpdateDescription {
    pub updated_fields: Document,
}

/// The mutation described by a change event.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Insert {
        id: Bson,
        document: Document,
    },
    Update {
        id: Bson,
        update: UpdateDescription,
        /// Post-image looked up by the feed, absent when the document is gone.
        document: Option<Document>,
    },
    Replace {
        id: Bson,
        document: Document,
    },
    Delete {
        id: Bson,
    },
    Other {
        kind: String,
        id: Option<Bson>,
    },
}

/// Errors raised while decoding a raw change stream document.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("change event has no operationType")]
    MissingOperationType,

    #[error("{kind} event is missing required field '{field}'")]
    MissingField {
        kind: OperationKind,
        field: &'static str,
    },
}

impl DecodeError {
    /// Operation kind of the rejected event, when it was readable.
    pub fn kind(&self) -> Option<&OperationKind> {
        match self {
            DecodeError::MissingOperationType => None,
            DecodeError::MissingField { kind, .. } => Some(kind),
        }
    }
}

/// A single change observed on a source collection.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub collection: String,
    /// Cluster time of the change. Only used for enrichment, never persisted.
    pub cluster_time: Option<Timestamp>,
    pub operation: Operation,
}

impl ChangeEvent {
    pub fn new(collection: impl Into<String>, operation: Operation) -> Self {
        Self {
            collection: collection.into(),
            cluster_time: None,
            operation,
        }
    }

    pub fn with_cluster_time(mut self, cluster_time: Timestamp) -> Self {
        self.cluster_time = Some(cluster_time);
        self
    }

    pub fn kind(&self) -> OperationKind {
        match &self.operation {
            Operation::Insert { .. } => OperationKind::Insert,
            Operation::Update { .. } => OperationKind::Update,
            Operation::Replace { .. } => OperationKind::Replace,
            Operation::Delete { .. } => OperationKind::Delete,
            Operation::Other { kind, .. } => OperationKind::from(kind.as_str()),
        }
    }

    /// Identity of the changed document, if the event carries one.
    pub fn document_id(&self) -> Option<&Bson> {
        match &self.operation {
            Operation::Insert { id, .. }
            | Operation::Update { id, .. }
            | Operation::Replace { id, .. }
            | Operation::Delete { id } => Some(id),
            Operation::Other { id, .. } => id.as_ref(),
        }
    }

    /// Full document snapshot, if the event carries one.
    pub fn document(&self) -> Option<&Document> {
        match &self.operation {
            Operation::Insert { document, .. } | Operation::Replace { document, .. } => {
                Some(document)
            }
            Operation::Update { document, .. } => document.as_ref(),
            Operation::Delete { .. } | Operation::Other { .. } => None,
        }
    }

    pub fn document_mut(&mut self) -> Option<&mut Document> {
        match &mut self.operation {
            Operation::Insert { document, .. } | Operation::Replace { document, .. } => {
                Some(document)
            }
            Operation::Update { document, .. } => document.as_mut(),
            Operation::Delete { .. } | Operation::Other { .. } => None,
        }
    }

    /// Decode a raw change stream document.
    ///
    /// `collection` is used when the event has no `ns.coll` (e.g. a
    /// database-level event seen on a collection stream).
    pub fn from_change_document(collection: &str, raw: &Document) -> Result<Self, DecodeError> {
        let kind = raw
            .get_str("operationType")
            .map(OperationKind::from)
            .map_err(|_| DecodeError::MissingOperationType)?;

        let collection = raw
            .get_document("ns")
            .ok()
            .and_then(|ns| ns.get_str("coll").ok())
            .unwrap_or(collection)
            .to_string();

        let cluster_time = raw.get_timestamp("clusterTime").ok();

        let id = raw
            .get_document("documentKey")
            .ok()
            .and_then(|key| key.get("_id"))
            .cloned();

        let full_document = match raw.get("fullDocument") {
            Some(Bson::Document(document)) => Some(document.clone()),
            _ => None,
        };

        let missing = |field: &'static str| DecodeError::MissingField {
            kind: kind.clone(),
            field,
        };

        let operation = match &kind {
            OperationKind::Insert => {
                let document = full_document.ok_or_else(|| missing("fullDocument"))?;
                let id = id
                    .or_else(|| document.get("_id").cloned())
                    .ok_or_else(|| missing("documentKey"))?;
                Operation::Insert { id, document }
            }
            OperationKind::Update => {
                let id = id.ok_or_else(|| missing("documentKey"))?;
                let updated_fields = raw
                    .get_document("updateDescription")
                    .ok()
                    .and_then(|update| update.get_document("updatedFields").ok())
                    .cloned()
                    .ok_or_else(|| missing("updateDescription"))?;
                Operation::Update {
                    id,
                    update: UpdateDescription { updated_fields },
                    document: full_document,
                }
            }
            OperationKind::Replace => Operation::Replace {
                id: id.ok_or_else(|| missing("documentKey"))?,
                document: full_document.ok_or_else(|| missing("fullDocument"))?,
            },
            OperationKind::Delete => Operation::Delete {
                id: id.ok_or_else(|| missing("documentKey"))?,
            },
            OperationKind::Other(name) => Operation::Other {
                kind: name.clone(),
                id,
            },
        };

        Ok(Self {
            collection,
            cluster_time,
            operation,
        })
    }
}
