//! Risk manager errors

use meridian_core::CircuitState;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BreakerError {
    #[error("Reset refused: operator {operator} not authorized")]
    Unauthorized { operator: String },

    #[error("Reset refused: circuit is {0:?}, not halted")]
    NotHalted(CircuitState),
}
