//! Circuit breaker and surveillance parameters
//!
//! Thresholds are static configuration, read once at startup.

use chrono::Duration;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Circuit breaker thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Fraction of tracked instruments that must be data-stale to degrade
    pub stale_fraction_threshold: Decimal,
    /// Drawdown that degrades the circuit (and raises a drawdown alert)
    pub drawdown_warning: Decimal,
    /// Drawdown that halts the circuit
    pub drawdown_hard: Decimal,
    /// Collaborator API error rate that degrades the circuit
    pub api_error_rate_threshold: Decimal,
    /// Conditions must stay clear this long before DEGRADED -> NORMAL (ms)
    pub cooldown_ms: u64,
    /// DEGRADED lasting longer than this halts (ms)
    pub halt_timeout_ms: u64,
    /// Shared secret an operator must present to reset a halt
    pub operator_token: String,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            stale_fraction_threshold: dec!(0.5),
            drawdown_warning: dec!(0.05),
            drawdown_hard: dec!(0.08),
            api_error_rate_threshold: dec!(0.5),
            cooldown_ms: 60_000,     // 1 minute
            halt_timeout_ms: 900_000, // 15 minutes
            operator_token: "change-me".to_string(),
        }
    }
}

impl BreakerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::milliseconds(self.cooldown_ms as i64)
    }

    pub fn halt_timeout(&self) -> Duration {
        Duration::milliseconds(self.halt_timeout_ms as i64)
    }

    /// Reject inconsistent thresholds
    pub fn validate(&self) -> Result<(), String> {
        if self.drawdown_warning <= Decimal::ZERO || self.drawdown_hard >= Decimal::ONE {
            return Err("drawdown thresholds must lie in (0, 1)".to_string());
        }
        if self.drawdown_warning >= self.drawdown_hard {
            return Err(format!(
                "drawdown_warning {} must be below drawdown_hard {}",
                self.drawdown_warning, self.drawdown_hard
            ));
        }
        if self.operator_token.is_empty() {
            return Err("operator_token must not be empty".to_string());
        }
        Ok(())
    }
}

/// Data-quality surveillance settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SurveillanceConfig {
    /// An instrument with no observation for this long is stale (ms)
    pub instrument_stale_after_ms: u64,
    /// Outcomes kept per collaborator for the error rate
    pub api_window: usize,
    /// Fewer outcomes than this never count as degraded
    pub api_min_samples: usize,
}

impl Default for SurveillanceConfig {
    fn default() -> Self {
        Self {
            instrument_stale_after_ms: 1_800_000, // 30 minutes
            api_window: 20,
            api_min_samples: 5,
        }
    }
}

impl SurveillanceConfig {
    pub fn instrument_stale_after(&self) -> Duration {
        Duration::milliseconds(self.instrument_stale_after_ms as i64)
    }
}
