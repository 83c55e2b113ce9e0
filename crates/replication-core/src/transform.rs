//! Enrichment of change events before they are applied to the target.

use crate::event::{ChangeEvent, OperationKind};
use bson::{doc, Bson, Document, Timestamp};
use chrono::{DateTime, Utc};

/// Field injected into replicated document snapshots.
pub const DEFAULT_METADATA_FIELD: &str = "_iris_metadata";

/// Replication metadata attached to a transformed operation.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicationMetadata {
    pub replicated_at: DateTime<Utc>,
    pub source_operation: OperationKind,
    pub source_timestamp: Option<Timestamp>,
}

impl ReplicationMetadata {
    pub fn to_document(&self) -> Document {
        doc! {
            "replicated_at": bson::DateTime::from_chrono(self.replicated_at),
            "source_operation_type": self.source_operation.as_str(),
            "source_timestamp": self
                .source_timestamp
                .map(Bson::Timestamp)
                .unwrap_or(Bson::Null),
        }
    }
}

/// A copied change event enriched with replication metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformedOperation {
    pub event: ChangeEvent,
    pub metadata: ReplicationMetadata,
}

impl TransformedOperation {
    pub fn kind(&self) -> OperationKind {
        self.event.kind()
    }
}

#[derive(Debug, Clone)]
pub struct OperationTransformer {
    metadata_field: String,
}

impl Default for OperationTransformer {
    fn default() -> Self {
        Self::new(DEFAULT_METADATA_FIELD)
    }
}

impl OperationTransformer {
    pub fn new(metadata_field: impl Into<String>) -> Self {
        Self {
            metadata_field: metadata_field.into(),
        }
    }

    /// Copy `event` and stamp its document snapshot with replication metadata.
    pub fn transform(&self, event: &ChangeEvent) -> TransformedOperation {
        self.transform_at(event, Utc::now())
    }

    /// Same as [`transform`](Self::transform) with an explicit replication time.
    pub fn transform_at(&self, event: &ChangeEvent, now: DateTime<Utc>) -> TransformedOperation {
        let mut copy = event.clone();
        let metadata = ReplicationMetadata {
            replicated_at: now,
            source_operation: copy.kind(),
            source_timestamp: copy.cluster_time,
        };

        if let Some(document) = copy.document_mut() {
            document.insert(self.metadata_field.clone(), metadata.to_document());
        }

        TransformedOperation {
            event: copy,
            metadata,
        }
    }
}
