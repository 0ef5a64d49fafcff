//! Core configuration
//!
//! One JSON document configures every component. Every section and field is
//! optional; anything omitted takes its default.
//!
//! ```json
//! {
//!   "confluence": { "window_ms": 600000, "min_agreeing_categories": 3 },
//!   "risk": { "confidence_threshold": "0.40", "headroom_policy": "reject" },
//!   "ledger": { "starting_equity": "100000", "exposure_ceiling": "50000" },
//!   "breaker": { "drawdown_warning": "0.05", "drawdown_hard": "0.10" },
//!   "pipeline": { "bus_capacity": 4096, "tick_interval_ms": 1000 }
//! }
//! ```

use chrono::Duration;
use meridian_gateway::PaperBrokerConfig;
use meridian_order_manager::{ConfluenceConfig, DispatchConfig, LedgerConfig, RiskGateConfig};
use meridian_risk_manager::{BreakerConfig, SurveillanceConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration loading errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {error}")]
    Io { path: String, error: String },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Write-behind audit trail settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Records buffered while the sink is slow or down
    pub buffer_capacity: usize,
    /// Retries per record before it is counted lost
    pub max_retries: u32,
    /// Backoff between retries, multiplied by the attempt number (ms)
    pub retry_backoff_ms: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 4096,
            max_retries: 5,
            retry_backoff_ms: 500,
        }
    }
}

impl AuditConfig {
    pub fn retry_backoff(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Task wiring and housekeeping cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Observation bus capacity
    pub bus_capacity: usize,
    /// Commands queued per instrument worker
    pub worker_queue: usize,
    /// Window expiry and breaker evaluation cadence (ms)
    pub tick_interval_ms: u64,
    /// Core event broadcast capacity
    pub event_capacity: usize,
    /// Resolved signals stay queryable this long (ms)
    pub signal_retention_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            bus_capacity: 4096,
            worker_queue: 256,
            tick_interval_ms: 1_000,
            event_capacity: 1024,
            signal_retention_ms: 3_600_000, // 1 hour
        }
    }
}

impl PipelineConfig {
    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.tick_interval_ms)
    }

    pub fn signal_retention(&self) -> Duration {
        Duration::milliseconds(self.signal_retention_ms as i64)
    }
}

/// Complete core configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub confluence: ConfluenceConfig,
    pub risk: RiskGateConfig,
    pub ledger: LedgerConfig,
    pub breaker: BreakerConfig,
    pub surveillance: SurveillanceConfig,
    pub dispatch: DispatchConfig,
    pub paper_broker: PaperBrokerConfig,
    pub audit: AuditConfig,
    pub pipeline: PipelineConfig,
}

impl CoreConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::from_json(&contents)
    }

    /// Parse configuration from a JSON string
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Check every section; the first problem found is reported
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.confluence
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("confluence: {}", e)))?;
        self.risk
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("risk: {}", e)))?;
        self.ledger
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("ledger: {}", e)))?;
        self.breaker
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("breaker: {}", e)))?;
        self.dispatch
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("dispatch: {}", e)))?;

        if self.pipeline.bus_capacity == 0
            || self.pipeline.worker_queue == 0
            || self.pipeline.event_capacity == 0
        {
            return Err(ConfigError::Invalid(
                "pipeline: queue capacities must be positive".to_string(),
            ));
        }
        if self.pipeline.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "pipeline: tick_interval_ms must be positive".to_string(),
            ));
        }
        if self.audit.buffer_capacity == 0 {
            return Err(ConfigError::Invalid(
                "audit: buffer_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_order_manager::HeadroomPolicy;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config_is_valid() {
        assert!(CoreConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let json = r#"{
            "risk": { "headroom_policy": "clip_to_headroom" },
            "ledger": { "exposure_ceiling": "20000" },
            "pipeline": { "tick_interval_ms": 250 }
        }"#;
        let config = CoreConfig::from_json(json).unwrap();

        assert_eq!(config.risk.headroom_policy, HeadroomPolicy::ClipToHeadroom);
        assert_eq!(config.risk.confidence_threshold, dec!(0.40));
        assert_eq!(config.ledger.exposure_ceiling, dec!(20000));
        assert_eq!(config.ledger.starting_equity, dec!(100000));
        assert_eq!(config.pipeline.tick_interval_ms, 250);
        assert_eq!(config.pipeline.bus_capacity, 4096);
        assert_eq!(config.confluence.min_agreeing_categories, 3);
    }

    #[test]
    fn test_empty_document_is_default() {
        let config = CoreConfig::from_json("{}").unwrap();
        assert_eq!(config.audit.max_retries, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_malformed_json_is_parse_error() {
        assert!(matches!(
            CoreConfig::from_json("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = CoreConfig::from_file("/nonexistent/meridian.json").unwrap_err();
        match err {
            ConfigError::Io { path, .. } => assert_eq!(path, "/nonexistent/meridian.json"),
            other => panic!("expected Io error, got {:?}", other),
        }
    }

    #[test]
    fn test_inverted_drawdown_thresholds_rejected() {
        let json = r#"{ "breaker": { "drawdown_warning": "0.12", "drawdown_hard": "0.10" } }"#;
        let config = CoreConfig::from_json(json).unwrap();
        match config.validate() {
            Err(ConfigError::Invalid(msg)) => assert!(msg.starts_with("breaker:")),
            other => panic!("expected Invalid, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_queue_rejected() {
        let mut config = CoreConfig::default();
        config.pipeline.worker_queue = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
