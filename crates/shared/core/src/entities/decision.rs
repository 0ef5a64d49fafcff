use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Direction, Signal, SignalId};
use crate::values::{InstrumentId, Price, Quantity, Timestamp};

/// How the risk gate resolved a candidate signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOutcome {
    Approve,
    /// Approved with a smaller size than requested
    Resize,
    Reject,
}

/// Machine-readable reason attached to every decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    Approved,
    CircuitHalted,
    PositionExists,
    InsufficientHeadroom,
    LowConfidence,
    NoReferencePrice,
    ResizedToInstrumentCap,
    ResizedToHeadroom,
    ResizedToVolatilityCap,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::Approved => "approved",
            ReasonCode::CircuitHalted => "circuit_halted",
            ReasonCode::PositionExists => "position_exists",
            ReasonCode::InsufficientHeadroom => "insufficient_headroom",
            ReasonCode::LowConfidence => "low_confidence",
            ReasonCode::NoReferencePrice => "no_reference_price",
            ReasonCode::ResizedToInstrumentCap => "resized_to_instrument_cap",
            ReasonCode::ResizedToHeadroom => "resized_to_headroom",
            ReasonCode::ResizedToVolatilityCap => "resized_to_volatility_cap",
        }
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of a risk gate decision, one per signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskDecision {
    pub signal_id: SignalId,
    pub instrument_id: InstrumentId,
    pub direction: Direction,
    pub outcome: DecisionOutcome,
    /// Approved size (unsigned), zero on rejection
    pub size: Quantity,
    /// size x entry reference price
    pub notional: Decimal,
    pub entry_price: Option<Price>,
    pub stop_loss: Option<Price>,
    pub confidence: Decimal,
    pub reason: ReasonCode,
    pub decided_at: Timestamp,
}

impl RiskDecision {
    pub fn reject(signal: &Signal, reason: ReasonCode, decided_at: Timestamp) -> Self {
        Self {
            signal_id: signal.id,
            instrument_id: signal.instrument_id.clone(),
            direction: signal.direction,
            outcome: DecisionOutcome::Reject,
            size: Decimal::ZERO,
            notional: Decimal::ZERO,
            entry_price: None,
            stop_loss: None,
            confidence: signal.confidence,
            reason,
            decided_at,
        }
    }

    /// Approve or resize; `reason` is `Approved` for a plain approval
    pub fn accept(
        signal: &Signal,
        size: Quantity,
        entry_price: Price,
        stop_loss: Price,
        reason: ReasonCode,
        decided_at: Timestamp,
    ) -> Self {
        let outcome = if reason == ReasonCode::Approved {
            DecisionOutcome::Approve
        } else {
            DecisionOutcome::Resize
        };
        Self {
            signal_id: signal.id,
            instrument_id: signal.instrument_id.clone(),
            direction: signal.direction,
            outcome,
            size,
            notional: size * entry_price,
            entry_price: Some(entry_price),
            stop_loss: Some(stop_loss),
            confidence: signal.confidence,
            reason,
            decided_at,
        }
    }

    /// Approve and resize both count as approvals
    pub fn is_approved(&self) -> bool {
        !matches!(self.outcome, DecisionOutcome::Reject)
    }

    /// Size signed by direction
    pub fn signed_size(&self) -> Decimal {
        self.size * self.direction.sign()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::SourceCategory;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    #[test]
    fn test_accept_outcomes() {
        let signal = Signal::new(
            "XYZ",
            Direction::Short,
            dec!(0.7),
            vec![Uuid::new_v4()],
            vec![SourceCategory::Filings],
            Utc::now(),
        );
        let approve = RiskDecision::accept(
            &signal,
            dec!(10),
            dec!(50),
            dec!(55),
            ReasonCode::Approved,
            Utc::now(),
        );
        assert_eq!(approve.outcome, DecisionOutcome::Approve);
        assert_eq!(approve.notional, dec!(500));
        assert_eq!(approve.signed_size(), dec!(-10));

        let resize = RiskDecision::accept(
            &signal,
            dec!(5),
            dec!(50),
            dec!(55),
            ReasonCode::ResizedToHeadroom,
            Utc::now(),
        );
        assert_eq!(resize.outcome, DecisionOutcome::Resize);
        assert!(resize.is_approved());

        let reject = RiskDecision::reject(&signal, ReasonCode::LowConfidence, Utc::now());
        assert!(!reject.is_approved());
        assert_eq!(reject.reason.as_str(), "low_confidence");
    }
}
