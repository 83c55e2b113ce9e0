use chrono::{DateTime, Duration, Utc};
use replication_core::CollectionConfig;

/// Expiry rule for one collection on one side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub collection: String,
    pub field: String,
    pub retention_days: u32,
}

impl RetentionPolicy {
    /// Build the policy for `collection`, or `None` when no index declares an
    /// expiry option.
    pub fn resolve(collection: &CollectionConfig, retention_days: u32) -> Option<Self> {
        collection.retention_field().map(|field| Self {
            collection: collection.name.clone(),
            field: field.to_string(),
            retention_days,
        })
    }

    /// Documents whose field is strictly before this instant are expired.
    ///
    /// A window reaching past the earliest representable date yields that
    /// date, so nothing expires.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        Duration::try_days(i64::from(self.retention_days))
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}
