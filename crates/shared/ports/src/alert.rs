use async_trait::async_trait;
use meridian_core::Alert;

use crate::error::SinkError;

/// Human-facing alerting collaborator
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn notify(&self, alert: &Alert) -> Result<(), SinkError>;
}
