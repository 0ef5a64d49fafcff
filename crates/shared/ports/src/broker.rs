use async_trait::async_trait;
use meridian_core::{BrokerOutcome, OrderIntent};

use crate::error::BrokerError;

/// Port for the broker/exchange adapter that actually places orders
///
/// Implementations must treat `intent.key` as an idempotency key: submitting
/// the same key twice never creates a second order.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Submit an order intent and wait for the fill or rejection
    async fn submit(&self, intent: &OrderIntent) -> Result<BrokerOutcome, BrokerError>;

    /// Name used in logs and error-rate tracking
    fn name(&self) -> &str {
        "broker"
    }
}
