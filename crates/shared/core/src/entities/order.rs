use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Direction, PositionId, SignalId};
use crate::values::{InstrumentId, Price, Quantity};

/// Unique identifier for a broker order
pub type OrderId = Uuid;

const IDEMPOTENCY_NAMESPACE: Uuid = Uuid::from_u128(0x6d65_7269_6469_616e_0002_6f72_6465_7273);

/// Which side of a position's life an order belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderLeg {
    Open,
    Close,
}

impl OrderLeg {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderLeg::Open => "open",
            OrderLeg::Close => "close",
        }
    }
}

/// Deterministic key identifying one order intent
///
/// Derived from the signal id and the leg, so every redelivery of the same
/// intent carries the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(pub Uuid);

impl IdempotencyKey {
    pub fn derive(signal_id: SignalId, leg: OrderLeg) -> Self {
        let mut name = signal_id.as_bytes().to_vec();
        name.extend_from_slice(leg.as_str().as_bytes());
        Self(Uuid::new_v5(&IDEMPOTENCY_NAMESPACE, &name))
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Order handed to the broker collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub key: IdempotencyKey,
    pub signal_id: SignalId,
    pub leg: OrderLeg,
    pub instrument_id: InstrumentId,
    /// Direction of this order (a close of a long is a short order)
    pub direction: Direction,
    /// Unsigned size
    pub size: Quantity,
    pub stop_loss: Option<Price>,
    /// Price the decision was sized against
    pub reference_price: Option<Price>,
    /// Position being closed, for close legs
    pub position_id: Option<PositionId>,
    pub created_at: DateTime<Utc>,
}

/// Confirmed fill from the broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: OrderId,
    pub key: IdempotencyKey,
    pub instrument_id: InstrumentId,
    pub price: Price,
    pub size: Quantity,
    pub timestamp: DateTime<Utc>,
}

/// Broker refused the order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerRejection {
    pub order_id: OrderId,
    pub key: IdempotencyKey,
    pub reason: String,
}

/// Outcome of a single broker submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BrokerOutcome {
    Filled(Fill),
    Rejected(BrokerRejection),
}

impl BrokerOutcome {
    pub fn is_filled(&self) -> bool {
        matches!(self, BrokerOutcome::Filled(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idempotency_key_is_deterministic() {
        let signal_id = Uuid::new_v4();
        let a = IdempotencyKey::derive(signal_id, OrderLeg::Open);
        let b = IdempotencyKey::derive(signal_id, OrderLeg::Open);
        let close = IdempotencyKey::derive(signal_id, OrderLeg::Close);
        assert_eq!(a, b);
        assert_ne!(a, close);
        assert_ne!(a, IdempotencyKey::derive(Uuid::new_v4(), OrderLeg::Open));
    }
}
