//! Configuration file model.
//!
//! ```yaml
//! source:
//!   uri: mongodb://source:27017
//!   database: app
//!   retention_days: 7
//! target:
//!   uri: mongodb://archive:27017
//!   database: app
//!   retention_days: 365
//! replication:
//!   exclude_operations: [delete]
//!   collections:
//!     - name: events
//!       indexes:
//!         - keys: { created_at: 1 }
//!           options: { expireAfterSeconds: 604800 }
//! monitoring:
//!   log_level: info
//!   metrics_file: iris-metrics.jsonl
//!   metrics_interval: 30s
//! ```

use crate::event::OperationKind;
use crate::transform::DEFAULT_METADATA_FIELD;
use bson::Document;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Index option whose presence marks the retention timestamp field.
pub const EXPIRY_OPTION: &str = "expireAfterSeconds";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrisConfig {
    pub source: StoreConfig,
    pub target: StoreConfig,
    pub replication: ReplicationConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Connection and retention settings of one side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub uri: String,
    pub database: String,
    pub retention_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    #[serde(default)]
    pub exclude_operations: Vec<OperationKind>,

    /// Field the replication metadata is written to.
    #[serde(default = "default_metadata_field")]
    pub metadata_field: String,

    pub collections: Vec<CollectionConfig>,
}

fn default_metadata_field() -> String {
    DEFAULT_METADATA_FIELD.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    pub name: String,
    #[serde(default)]
    pub indexes: Vec<IndexConfig>,
}

impl CollectionConfig {
    /// Key of the first index declaring an expiry option.
    pub fn retention_field(&self) -> Option<&str> {
        self.indexes
            .iter()
            .find(|index| index.options.contains_key(EXPIRY_OPTION))
            .and_then(|index| index.keys.keys().next())
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Ordered `field: direction` pairs.
    pub keys: Document,
    /// Index options in server naming (`expireAfterSeconds`, `unique`, ...).
    #[serde(default)]
    pub options: Document,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub log_level: Option<String>,
    pub metrics_file: Option<PathBuf>,
    /// Emission interval, e.g. "30s", "5m" or plain seconds.
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval: String,
}

fn default_metrics_interval() -> String {
    "30s".to_string()
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: None,
            metrics_file: None,
            metrics_interval: default_metrics_interval(),
        }
    }
}

impl IrisConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: IrisConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.replication.collections.is_empty() {
            return Err(ConfigError::Invalid(
                "replication.collections must list at least one collection".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for collection in &self.replication.collections {
            if collection.name.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "collection name must not be empty".to_string(),
                ));
            }
            if !seen.insert(collection.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "collection '{}' is configured more than once",
                    collection.name
                )));
            }
            if let Some(index) = collection.indexes.iter().find(|i| i.keys.is_empty()) {
                return Err(ConfigError::Invalid(format!(
                    "index on '{}' has no keys (options: {})",
                    collection.name, index.options
                )));
            }
        }

        if self.replication.metadata_field.is_empty() {
            return Err(ConfigError::Invalid(
                "replication.metadata_field must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Operation kinds excluded from replication.
    pub fn excluded_operations(&self) -> &[OperationKind] {
        &self.replication.exclude_operations
    }

    pub fn collection_names(&self) -> impl Iterator<Item = &str> {
        self.replication.collections.iter().map(|c| c.name.as_str())
    }
}
