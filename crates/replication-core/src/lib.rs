//! Core types for iris-sync
//!
//! This crate holds everything in the replication pipeline that does not talk
//! to a database driver directly:
//!
//! - [`ChangeEvent`] - decoded change stream events
//! - [`OperationFilter`] - drops excluded operation kinds
//! - [`OperationTransformer`] - copy-on-transform metadata enrichment
//! - [`TargetApplier`] - per-operation apply logic over a [`TargetStore`]
//! - [`Monitor`] / [`MonitoringService`] - operation and error reporting
//! - [`IrisConfig`] - the configuration file model
//!
//! ```text
//! ChangeFeed -> OperationFilter -> OperationTransformer -> TargetApplier -> TargetStore
//!                      \______________________ Monitor ______________________/
//! ```

pub mod applier;
pub mod config;
pub mod event;
pub mod filter;
pub mod memory;
pub mod monitoring;
pub mod store;
pub mod transform;

pub use applier::{Applied, ApplyError, ApplyResult, TargetApplier};
pub use config::{
    CollectionConfig, ConfigError, IndexConfig, IrisConfig, MonitoringConfig, ReplicationConfig,
    StoreConfig, EXPIRY_OPTION,
};
pub use event::{ChangeEvent, DecodeError, Operation, OperationKind, UpdateDescription};
pub use filter::OperationFilter;
pub use monitoring::{ErrorKind, MetricsSnapshot, Monitor, MonitoringService};
pub use store::{
    ChangeFeed, ChangeFeedSource, CollectionAdmin, FeedEvent, FeedOptions, RetentionStore,
    TargetStore, UpdateCounts,
};
pub use transform::{
    OperationTransformer, ReplicationMetadata, TransformedOperation, DEFAULT_METADATA_FIELD,
};
