use async_trait::async_trait;
use meridian_core::AuditRecord;

use crate::error::SinkError;

/// Append-only persistence of signals, decisions and position lifecycle events
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, record: &AuditRecord) -> Result<(), SinkError>;
}
