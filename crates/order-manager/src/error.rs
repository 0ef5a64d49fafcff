//! Decision core errors
//!
//! Data conditions (`DataStale`, `ConflictingSignal`) are absorbed where they
//! arise. Ledger invariant violations (`DuplicatePosition`, `UnknownPosition`)
//! indicate a bug and are surfaced loudly. Dispatch failures are retried,
//! then escalated to `ExecutionFailure`.

use meridian_core::{
    IdempotencyKey, InstrumentId, PositionId, ReasonCode, SignalId, StatusTransitionError,
};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Instrument {0} is data-stale")]
    DataStale(InstrumentId),

    #[error("Conflicting directions in window for {0}")]
    ConflictingSignal(InstrumentId),

    #[error("Signal {signal_id} rejected: {reason}")]
    RiskRejected {
        signal_id: SignalId,
        reason: ReasonCode,
    },

    #[error("Open position already exists for {0}")]
    DuplicatePosition(InstrumentId),

    #[error("No open position {0}")]
    UnknownPosition(PositionId),

    #[error("Dispatch of {key} failed on attempt {attempt}: {reason}")]
    DispatchFailed {
        key: IdempotencyKey,
        attempt: u32,
        reason: String,
    },

    #[error("Execution failed for {key} after {attempts} attempts: {reason}")]
    ExecutionFailure {
        key: IdempotencyKey,
        attempts: u32,
        reason: String,
    },

    #[error("Order {0} is already in flight")]
    DispatchInFlight(IdempotencyKey),

    #[error("Circuit halted: new approvals refused")]
    CircuitHalted,

    #[error(transparent)]
    InvalidTransition(#[from] StatusTransitionError),

    #[error("Unknown signal: {0}")]
    UnknownSignal(SignalId),
}

impl Error {
    /// Invariant violations that indicate a correctness bug
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            Error::DuplicatePosition(_) | Error::UnknownPosition(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
