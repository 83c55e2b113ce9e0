//! iris-sync
//!
//! Continuous replication of MongoDB collections from a source database to a
//! target database, with retention sweeps that expire aged documents on both
//! ends.
//!
//! # Crates
//!
//! - `replication_core` - change events, filter, transformer, applier,
//!   monitoring and configuration
//! - `iris_sync_mongodb_changestream_source` - per-collection change stream
//!   listeners
//! - `iris_sync_mongodb_sink` - MongoDB target, retention and admin stores
//! - `retention` - the scheduled retention sweeper
//!
//! # CLI Usage
//!
//! ```bash
//! # Replicate until interrupted
//! iris-sync --config config/config.yaml run
//!
//! # Validate a configuration file
//! iris-sync --config config/config.yaml check-config
//!
//! # Run a single retention cycle
//! iris-sync --config config/config.yaml sweep-once
//! ```

pub mod app;
pub mod config;
pub mod controller;

pub use app::{build_sweeper, connect_stores, run_replication, Stores};
pub use config::{load_config, metrics_interval, parse_duration};
pub use controller::ReplicationController;
