use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::values::Timestamp;

/// Process-wide safety state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation
    Normal,
    /// Warning level - approvals continue, conditions are watched
    Degraded,
    /// No new approvals until an explicit reset
    Halted,
}

impl CircuitState {
    /// Check if new signals may be approved
    pub fn allows_approval(&self) -> bool {
        !matches!(self, CircuitState::Halted)
    }
}

/// Why the circuit moved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum CircuitCause {
    Startup,
    DataStaleness { stale_fraction: Decimal },
    DrawdownWarning { drawdown: Decimal },
    DrawdownHard { drawdown: Decimal },
    ApiErrorRate { source: String, error_rate: Decimal },
    DegradedTimeout { degraded_secs: i64 },
    OperatorHalt { operator: String, note: String },
    ConditionsCleared,
    OperatorReset { operator: String },
}

impl std::fmt::Display for CircuitCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitCause::Startup => write!(f, "startup"),
            CircuitCause::DataStaleness { stale_fraction } => {
                write!(f, "data staleness ({} of instruments stale)", stale_fraction)
            }
            CircuitCause::DrawdownWarning { drawdown } => {
                write!(f, "drawdown warning ({})", drawdown)
            }
            CircuitCause::DrawdownHard { drawdown } => {
                write!(f, "hard drawdown breach ({})", drawdown)
            }
            CircuitCause::ApiErrorRate { source, error_rate } => {
                write!(f, "{} error rate {}", source, error_rate)
            }
            CircuitCause::DegradedTimeout { degraded_secs } => {
                write!(f, "degraded for {}s", degraded_secs)
            }
            CircuitCause::OperatorHalt { operator, note } => {
                write!(f, "operator halt by {}: {}", operator, note)
            }
            CircuitCause::ConditionsCleared => write!(f, "conditions cleared"),
            CircuitCause::OperatorReset { operator } => write!(f, "operator reset by {}", operator),
        }
    }
}

/// Current circuit state with the cause and time of the last transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitStatus {
    pub state: CircuitState,
    pub cause: CircuitCause,
    pub since: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitTransition {
    pub from: CircuitState,
    pub to: CircuitState,
    pub cause: CircuitCause,
    pub at: Timestamp,
}
