//! Persistence and alerting adapters
//!
//! - [`JsonLinesAuditSink`]: appends audit records as JSON lines to a file
//! - [`MemoryAuditSink`]: in-memory trail with a switchable outage
//! - [`LogAlertSink`]: routes alerts to the log at their severity
//! - [`RecordingAlertSink`]: keeps alerts for inspection

use async_trait::async_trait;
use log::{error, info, warn};
use meridian_core::{Alert, AlertSeverity, AuditRecord};
use meridian_ports::{AlertSink, AuditSink, SinkError};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::AsyncWriteExt;

use crate::error::GatewayError;

/// Append-only JSON lines file
pub struct JsonLinesAuditSink {
    file: tokio::sync::Mutex<tokio::fs::File>,
}

impl JsonLinesAuditSink {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, GatewayError> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())
            .await?;
        Ok(Self {
            file: tokio::sync::Mutex::new(file),
        })
    }
}

#[async_trait]
impl AuditSink for JsonLinesAuditSink {
    async fn append(&self, record: &AuditRecord) -> Result<(), SinkError> {
        let mut line =
            serde_json::to_vec(record).map_err(|e| SinkError::Rejected(e.to_string()))?;
        line.push(b'\n');
        let mut file = self.file.lock().await;
        file.write_all(&line)
            .await
            .map_err(|e| SinkError::Unavailable(e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| SinkError::Unavailable(e.to_string()))
    }
}

/// In-memory audit trail
#[derive(Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
    down: AtomicBool,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a persistence outage (`false`) or recovery (`true`)
    pub fn set_available(&self, available: bool) {
        self.down.store(!available, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, record: &AuditRecord) -> Result<(), SinkError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(SinkError::Unavailable("audit store offline".to_string()));
        }
        self.records.lock().push(record.clone());
        Ok(())
    }
}

/// Writes alerts to the log
#[derive(Default)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn notify(&self, alert: &Alert) -> Result<(), SinkError> {
        match alert.severity() {
            AlertSeverity::Critical => error!("[ALERT] {}", alert),
            AlertSeverity::Warning => warn!("[ALERT] {}", alert),
            AlertSeverity::Info => info!("[ALERT] {}", alert),
        }
        Ok(())
    }
}

/// Keeps every alert it receives
#[derive(Default)]
pub struct RecordingAlertSink {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().clone()
    }
}

#[async_trait]
impl AlertSink for RecordingAlertSink {
    async fn notify(&self, alert: &Alert) -> Result<(), SinkError> {
        self.alerts.lock().push(alert.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use meridian_core::{CircuitCause, CircuitState, CircuitTransition};

    fn transition() -> CircuitTransition {
        CircuitTransition {
            from: CircuitState::Normal,
            to: CircuitState::Halted,
            cause: CircuitCause::OperatorHalt {
                operator: "ops".to_string(),
                note: "drill".to_string(),
            },
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_memory_sink_outage() {
        let sink = MemoryAuditSink::new();
        let record = AuditRecord::CircuitTransition(transition());

        sink.set_available(false);
        assert!(sink.append(&record).await.is_err());
        assert!(sink.is_empty());

        sink.set_available(true);
        sink.append(&record).await.unwrap();
        assert_eq!(sink.records(), vec![record]);
    }

    #[tokio::test]
    async fn test_json_lines_sink_appends() {
        let path = std::env::temp_dir().join(format!("meridian-audit-{}.jsonl", uuid::Uuid::new_v4()));
        let sink = JsonLinesAuditSink::open(&path).await.unwrap();
        sink.append(&AuditRecord::CircuitTransition(transition()))
            .await
            .unwrap();
        sink.append(&AuditRecord::CircuitTransition(transition()))
            .await
            .unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: AuditRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed.kind(), "circuit_transition");
        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn test_recording_sink() {
        let sink = RecordingAlertSink::new();
        let alert = Alert::CircuitTransition(transition());
        sink.notify(&alert).await.unwrap();
        assert_eq!(sink.alerts().len(), 1);
        assert_eq!(sink.alerts()[0].severity(), AlertSeverity::Critical);
        LogAlertSink.notify(&alert).await.unwrap();
    }
}
