//! Monitoring hooks and the in-memory metrics registry.

use crate::event::OperationKind;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

/// Category of an error reported to monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ChangeStream,
    DecodeEvent,
    ApplyOperation,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ChangeStream => "change_stream",
            ErrorKind::DecodeEvent => "decode_event",
            ErrorKind::ApplyOperation => "apply_operation",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fire-and-forget monitoring sink shared by every background task.
pub trait Monitor: Send + Sync {
    fn record_operation(&self, collection: &str, kind: &OperationKind);

    fn record_error(&self, collection: &str, error_kind: ErrorKind, message: &str);
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    pub collection: String,
    pub error_kind: ErrorKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LastOperation {
    pub kind: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LastError {
    pub kind: ErrorKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CollectionStatus {
    pub last_operation: Option<LastOperation>,
    pub last_error: Option<LastError>,
}

/// Point-in-time copy of everything the registry knows.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
    /// collection -> operation kind -> count
    pub operations: BTreeMap<String, BTreeMap<String, u64>>,
    pub errors: Vec<ErrorRecord>,
    pub collections: BTreeMap<String, CollectionStatus>,
}

#[derive(Debug, Default)]
struct Metrics {
    operations: BTreeMap<String, BTreeMap<String, u64>>,
    errors: Vec<ErrorRecord>,
    collections: BTreeMap<String, CollectionStatus>,
}

/// In-memory [`Monitor`] keeping counters, last seen operation/error per
/// collection and a rolling error log.
#[derive(Debug)]
pub struct MonitoringService {
    started_at: DateTime<Utc>,
    error_retention: chrono::Duration,
    metrics: Mutex<Metrics>,
}

impl Default for MonitoringService {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitoringService {
    pub fn new() -> Self {
        Self::with_error_retention(chrono::Duration::days(30))
    }

    pub fn with_error_retention(error_retention: chrono::Duration) -> Self {
        Self {
            started_at: Utc::now(),
            error_retention,
            metrics: Mutex::new(Metrics::default()),
        }
    }

    // A poisoned lock still holds usable counters.
    fn metrics(&self) -> MutexGuard<'_, Metrics> {
        self.metrics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn operation_count(&self, collection: &str, kind: &OperationKind) -> u64 {
        self.metrics()
            .operations
            .get(collection)
            .and_then(|kinds| kinds.get(kind.as_str()))
            .copied()
            .unwrap_or(0)
    }

    pub fn error_count(&self, collection: &str, error_kind: ErrorKind) -> usize {
        self.metrics()
            .errors
            .iter()
            .filter(|e| e.collection == collection && e.error_kind == error_kind)
            .count()
    }

    pub fn errors(&self) -> Vec<ErrorRecord> {
        self.metrics().errors.clone()
    }

    pub fn collection_status(&self, collection: &str) -> Option<CollectionStatus> {
        self.metrics().collections.get(collection).cloned()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let metrics = self.metrics();
        MetricsSnapshot {
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds(),
            operations: metrics.operations.clone(),
            errors: metrics.errors.clone(),
            collections: metrics.collections.clone(),
        }
    }

    fn record_error_at(
        &self,
        collection: &str,
        error_kind: ErrorKind,
        message: &str,
        timestamp: DateTime<Utc>,
    ) {
        let mut metrics = self.metrics();
        metrics.errors.push(ErrorRecord {
            collection: collection.to_string(),
            error_kind,
            message: message.to_string(),
            timestamp,
        });

        let cutoff = Utc::now() - self.error_retention;
        metrics.errors.retain(|e| e.timestamp > cutoff);

        metrics
            .collections
            .entry(collection.to_string())
            .or_default()
            .last_error = Some(LastError {
            kind: error_kind,
            message: message.to_string(),
            timestamp,
        });
    }

    /// Append a JSON snapshot line to `output_path` every `interval` until
    /// `cancel` fires.
    pub fn start_emission_task(
        self: &Arc<Self>,
        output_path: PathBuf,
        interval: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<Result<()>> {
        let service = Arc::clone(self);

        tokio::spawn(async move {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&output_path)
                .await?;

            let mut interval_timer = tokio::time::interval(interval);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval_timer.tick() => {}
                }

                let json_line = serde_json::to_string(&service.snapshot())?;
                file.write_all(json_line.as_bytes()).await?;
                file.write_all(b"\n").await?;
                file.flush().await?;
            }

            tracing::debug!("Metrics emission to {} stopped", output_path.display());
            Ok(())
        })
    }
}

impl Monitor for MonitoringService {
    fn record_operation(&self, collection: &str, kind: &OperationKind) {
        let mut metrics = self.metrics();
        *metrics
            .operations
            .entry(collection.to_string())
            .or_default()
            .entry(kind.to_string())
            .or_insert(0) += 1;

        metrics
            .collections
            .entry(collection.to_string())
            .or_default()
            .last_operation = Some(LastOperation {
            kind: kind.to_string(),
            timestamp: Utc::now(),
        });
    }

    fn record_error(&self, collection: &str, error_kind: ErrorKind, message: &str) {
        self.record_error_at(collection, error_kind, message, Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_counters() {
        let service = MonitoringService::new();
        service.record_operation("users", &OperationKind::Insert);
        service.record_operation("users", &OperationKind::Insert);
        service.record_operation("users", &OperationKind::Delete);
        service.record_operation("orders", &OperationKind::Update);

        assert_eq!(service.operation_count("users", &OperationKind::Insert), 2);
        assert_eq!(service.operation_count("users", &OperationKind::Delete), 1);
        assert_eq!(service.operation_count("users", &OperationKind::Update), 0);
        assert_eq!(service.operation_count("orders", &OperationKind::Update), 1);

        let status = service.collection_status("users").unwrap();
        assert_eq!(status.last_operation.unwrap().kind, "delete");
        assert!(status.last_error.is_none());
    }

    #[test]
    fn test_errors_are_recorded_and_pruned() {
        let service = MonitoringService::new();
        service.record_error_at(
            "users",
            ErrorKind::ChangeStream,
            "old",
            Utc::now() - chrono::Duration::days(31),
        );
        service.record_error("users", ErrorKind::ApplyOperation, "duplicate key");

        let errors = service.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "duplicate key");
        assert_eq!(service.error_count("users", ErrorKind::ApplyOperation), 1);
        assert_eq!(service.error_count("users", ErrorKind::ChangeStream), 0);

        let last_error = service.collection_status("users").unwrap().last_error.unwrap();
        assert_eq!(last_error.kind, ErrorKind::ApplyOperation);
    }

    #[test]
    fn test_snapshot_serializes() {
        let service = MonitoringService::new();
        service.record_operation("users", &OperationKind::Replace);
        service.record_error("users", ErrorKind::ChangeStream, "connection reset");

        let json = serde_json::to_value(service.snapshot()).unwrap();
        assert_eq!(json["operations"]["users"]["replace"], 1);
        assert_eq!(json["errors"][0]["error_kind"], "change_stream");
        assert_eq!(
            json["collections"]["users"]["last_error"]["message"],
            "connection reset"
        );
    }

    #[test]
    fn test_concurrent_recording() {
        let service = Arc::new(MonitoringService::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let service = Arc::clone(&service);
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        service.record_operation("users", &OperationKind::Insert);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(service.operation_count("users", &OperationKind::Insert), 1000);
    }

    #[tokio::test]
    async fn test_emission_task_writes_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.jsonl");
        let service = Arc::new(MonitoringService::new());
        service.record_operation("users", &OperationKind::Insert);

        let cancel = CancellationToken::new();
        let handle =
            service.start_emission_task(path.clone(), Duration::from_millis(20), cancel.clone());
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert!(!lines.is_empty());
        let entry: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(entry["operations"]["users"]["insert"], 1);
    }
}
