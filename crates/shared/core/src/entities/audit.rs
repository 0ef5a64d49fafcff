use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{
    CircuitTransition, IdempotencyKey, Position, RiskDecision, Signal, SignalId, SignalStatus,
};
use crate::values::Timestamp;

/// Append-only record written to the persistence collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum AuditRecord {
    SignalGenerated(Signal),
    SignalStatusChanged {
        signal_id: SignalId,
        from: SignalStatus,
        to: SignalStatus,
        at: Timestamp,
    },
    RiskDecision(RiskDecision),
    PositionOpened(Position),
    PositionClosed(Position),
    CircuitTransition(CircuitTransition),
    DispatchFailed {
        key: IdempotencyKey,
        signal_id: SignalId,
        attempt: u32,
        reason: String,
        at: Timestamp,
    },
}

impl AuditRecord {
    pub fn kind(&self) -> &'static str {
        match self {
            AuditRecord::SignalGenerated(_) => "signal_generated",
            AuditRecord::SignalStatusChanged { .. } => "signal_status_changed",
            AuditRecord::RiskDecision(_) => "risk_decision",
            AuditRecord::PositionOpened(_) => "position_opened",
            AuditRecord::PositionClosed(_) => "position_closed",
            AuditRecord::CircuitTransition(_) => "circuit_transition",
            AuditRecord::DispatchFailed { .. } => "dispatch_failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

/// Notification for the human-facing alerting collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "alert", rename_all = "snake_case")]
pub enum Alert {
    CircuitTransition(CircuitTransition),
    ExecutionFailure {
        key: IdempotencyKey,
        signal_id: SignalId,
        attempts: u32,
        reason: String,
        at: Timestamp,
    },
    DrawdownThreshold {
        drawdown: Decimal,
        threshold: Decimal,
        at: Timestamp,
    },
    InvariantViolation {
        detail: String,
        at: Timestamp,
    },
}

impl Alert {
    pub fn severity(&self) -> AlertSeverity {
        use super::CircuitState;

        match self {
            Alert::CircuitTransition(t) => match t.to {
                CircuitState::Halted => AlertSeverity::Critical,
                CircuitState::Degraded => AlertSeverity::Warning,
                CircuitState::Normal => AlertSeverity::Info,
            },
            Alert::ExecutionFailure { .. } | Alert::InvariantViolation { .. } => {
                AlertSeverity::Critical
            }
            Alert::DrawdownThreshold { .. } => AlertSeverity::Warning,
        }
    }
}

impl std::fmt::Display for Alert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Alert::CircuitTransition(t) => {
                write!(f, "circuit {:?} -> {:?}: {}", t.from, t.to, t.cause)
            }
            Alert::ExecutionFailure {
                signal_id,
                attempts,
                reason,
                ..
            } => write!(
                f,
                "execution failed for signal {} after {} attempts: {}",
                signal_id, attempts, reason
            ),
            Alert::DrawdownThreshold {
                drawdown,
                threshold,
                ..
            } => write!(f, "drawdown {} crossed {}", drawdown, threshold),
            Alert::InvariantViolation { detail, .. } => write!(f, "invariant violation: {}", detail),
        }
    }
}
