//! Loading and checking the configuration file.

pub mod duration;

pub use duration::parse_duration;

use anyhow::Context;
use replication_core::IrisConfig;
use std::path::Path;
use std::time::Duration;

/// Read, parse and validate the configuration at `path`.
///
/// Beyond [`IrisConfig::validate`], the metrics interval must parse as a
/// duration.
pub fn load_config(path: &Path) -> anyhow::Result<IrisConfig> {
    let config = IrisConfig::from_file(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    metrics_interval(&config)?;
    Ok(config)
}

pub fn metrics_interval(config: &IrisConfig) -> anyhow::Result<Duration> {
    parse_duration(&config.monitoring.metrics_interval).with_context(|| {
        format!(
            "Invalid monitoring.metrics_interval '{}'",
            config.monitoring.metrics_interval
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CONFIG: &str = r#"
source:
  uri: mongodb://source:27017
  database: app
  retention_days: 7
target:
  uri: mongodb://archive:27017
  database: app_archive
  retention_days: 365
replication:
  exclude_operations: [delete]
  collections:
    - name: events
      indexes:
        - keys: { created_at: 1 }
          options: { expireAfterSeconds: 604800 }
monitoring:
  metrics_interval: 5m
"#;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_config() {
        let file = write_config(CONFIG);
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.target.database, "app_archive");
        assert_eq!(
            metrics_interval(&config).unwrap(),
            Duration::from_secs(300)
        );
    }

    #[test]
    fn test_load_config_rejects_bad_interval() {
        let file = write_config(&CONFIG.replace("metrics_interval: 5m", "metrics_interval: soon"));
        let err = load_config(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("metrics_interval"));
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config(Path::new("/nonexistent/iris.yaml")).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to load config"));
    }
}
