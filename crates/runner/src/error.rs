//! Runner errors

use crate::config::ConfigError;
use meridian_gateway::GatewayError;
use meridian_risk_manager::BreakerError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Circuit breaker: {0}")]
    Breaker(#[from] BreakerError),

    #[error("Order manager: {0}")]
    OrderManager(#[from] meridian_order_manager::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
