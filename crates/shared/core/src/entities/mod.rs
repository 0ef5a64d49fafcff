mod audit;
mod circuit;
mod decision;
mod direction;
mod observation;
mod order;
mod position;
mod signal;

pub use audit::{Alert, AlertSeverity, AuditRecord};
pub use circuit::{CircuitCause, CircuitState, CircuitStatus, CircuitTransition};
pub use decision::{DecisionOutcome, ReasonCode, RiskDecision};
pub use direction::Direction;
pub use observation::{
    ContractKind, Observation, ObservationError, ObservationId, ObservationMetadata, PriceBar,
    SourceCategory,
};
pub use order::{BrokerOutcome, BrokerRejection, Fill, IdempotencyKey, OrderId, OrderIntent, OrderLeg};
pub use position::{Position, PositionId, PositionStatus};
pub use signal::{Signal, SignalId, SignalStatus, StatusTransitionError};
