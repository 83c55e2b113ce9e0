use crate::event::{ChangeEvent, OperationKind};
use std::collections::HashSet;

/// Drops change events whose operation kind is excluded from replication.
#[derive(Debug, Clone, Default)]
pub struct OperationFilter {
    excluded: HashSet<OperationKind>,
}

impl OperationFilter {
    pub fn new(excluded: impl IntoIterator<Item = OperationKind>) -> Self {
        Self {
            excluded: excluded.into_iter().collect(),
        }
    }

    /// Returns true if the event should continue down the pipeline.
    pub fn should_process(&self, event: &ChangeEvent) -> bool {
        !self.excluded.contains(&event.kind())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Operation;
    use bson::{doc, Bson};

    fn delete_event() -> ChangeEvent {
        ChangeEvent::new("users", Operation::Delete { id: Bson::Int32(1) })
    }

    fn insert_event() -> ChangeEvent {
        ChangeEvent::new(
            "users",
            Operation::Insert {
                id: Bson::Int32(1),
                document: doc! { "_id": 1 },
            },
        )
    }

    #[test]
    fn test_excluded_kinds_are_dropped() {
        let filter = OperationFilter::new([OperationKind::Delete]);
        assert!(!filter.should_process(&delete_event()));
        assert!(filter.should_process(&insert_event()));
    }

    #[test]
    fn test_empty_exclusion_passes_everything() {
        let filter = OperationFilter::default();
        assert!(filter.should_process(&delete_event()));
        assert!(filter.should_process(&insert_event()));
    }

    #[test]
    fn test_other_kinds_match_by_name() {
        let filter = OperationFilter::new([OperationKind::from("drop")]);
        let drop = ChangeEvent::new(
            "users",
            Operation::Other {
                kind: "drop".into(),
                id: None,
            },
        );
        assert!(!filter.should_process(&drop));

        let rename = ChangeEvent::new(
            "users",
            Operation::Other {
                kind: "rename".into(),
                id: None,
            },
        );
        assert!(filter.should_process(&rename));
    }
}
