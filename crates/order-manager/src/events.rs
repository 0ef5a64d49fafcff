//! Core events
//!
//! Everything the decision core does is announced on a broadcast channel of
//! [`CoreEvent`]s. The runner turns them into audit records; tests and
//! operators subscribe to watch the pipeline.

use meridian_core::{
    CircuitTransition, IdempotencyKey, InstrumentId, Position, PositionId, Price, RiskDecision,
    Signal, SignalId,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::confluence::SuppressionReason;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CoreEvent {
    SignalEmitted(Signal),
    SignalStrengthened {
        signal_id: SignalId,
        confidence: Decimal,
    },
    SignalExpired {
        signal_id: SignalId,
    },
    Suppressed {
        instrument_id: InstrumentId,
        reason: SuppressionReason,
    },
    Decision(RiskDecision),
    DispatchFailed {
        key: IdempotencyKey,
        signal_id: SignalId,
        attempt: u32,
        reason: String,
    },
    ExecutionFailure {
        key: IdempotencyKey,
        signal_id: SignalId,
        attempts: u32,
        reason: String,
    },
    PositionOpened(Position),
    PositionClosed(Position),
    StopTriggered {
        position_id: PositionId,
        price: Price,
    },
    Circuit(CircuitTransition),
}

impl CoreEvent {
    pub fn name(&self) -> &'static str {
        match self {
            CoreEvent::SignalEmitted(_) => "signal_emitted",
            CoreEvent::SignalStrengthened { .. } => "signal_strengthened",
            CoreEvent::SignalExpired { .. } => "signal_expired",
            CoreEvent::Suppressed { .. } => "suppressed",
            CoreEvent::Decision(_) => "decision",
            CoreEvent::DispatchFailed { .. } => "dispatch_failed",
            CoreEvent::ExecutionFailure { .. } => "execution_failure",
            CoreEvent::PositionOpened(_) => "position_opened",
            CoreEvent::PositionClosed(_) => "position_closed",
            CoreEvent::StopTriggered { .. } => "stop_triggered",
            CoreEvent::Circuit(_) => "circuit",
        }
    }
}
