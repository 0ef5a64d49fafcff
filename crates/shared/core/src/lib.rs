//! Meridian Core Domain
//!
//! Pure domain types for the signal aggregation and risk gating core.
//! This crate contains no async, no I/O, and is 100% unit testable.
//!
//! Ownership runs one way: observations are owned by confluence windows,
//! signals reference observations by id, positions reference signals by id.

pub mod entities;
pub mod values;

// Re-export commonly used types at crate root
pub use entities::{
    // Alerting & audit
    Alert,
    AlertSeverity,
    AuditRecord,
    // Orders
    BrokerOutcome,
    BrokerRejection,
    // Circuit
    CircuitCause,
    CircuitState,
    CircuitStatus,
    CircuitTransition,
    ContractKind,
    // Decisions
    DecisionOutcome,
    Direction,
    Fill,
    IdempotencyKey,
    // Observations
    Observation,
    ObservationError,
    ObservationId,
    ObservationMetadata,
    OrderId,
    OrderIntent,
    OrderLeg,
    // Positions
    Position,
    PositionId,
    PositionStatus,
    PriceBar,
    ReasonCode,
    RiskDecision,
    // Signals
    Signal,
    SignalId,
    SignalStatus,
    SourceCategory,
    StatusTransitionError,
};
pub use values::{InstrumentId, Price, Quantity, Timestamp};
