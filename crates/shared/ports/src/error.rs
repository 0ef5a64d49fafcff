use thiserror::Error;

/// Errors surfaced by the broker collaborator
///
/// A broker *rejection* is not an error; it is a `BrokerOutcome::Rejected`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("Broker timed out")]
    Timeout,

    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    #[error("Broker transport failure: {0}")]
    Transport(String),
}

/// Errors from persistence and alerting sinks
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("Sink unavailable: {0}")]
    Unavailable(String),

    #[error("Write rejected: {0}")]
    Rejected(String),
}
