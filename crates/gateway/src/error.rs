//! Error types for the gateway crate

use meridian_core::ObservationError;
use thiserror::Error;

/// Transport-level errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Channel closed")]
    ChannelClosed,
}

/// Gateway-level errors (adapter operations)
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Invalid observation: {0}")]
    InvalidObservation(#[from] ObservationError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(e: std::io::Error) -> Self {
        GatewayError::Io(e.to_string())
    }
}
