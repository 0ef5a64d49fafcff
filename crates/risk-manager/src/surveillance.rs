//! Data-Quality Surveillance
//!
//! Monitors the health of the core's inputs and collaborators:
//! - Per-instrument freshness (time since the last observation was received)
//! - Collaborator API error rates over a rolling window of outcomes
//!
//! The circuit breaker samples these on every housekeeping tick.

use crate::parameters::SurveillanceConfig;
use dashmap::DashMap;
use log::debug;
use meridian_core::{InstrumentId, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Snapshot of everything the breaker decides on
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BreakerInputs {
    /// Fraction of tracked instruments currently stale
    pub stale_fraction: Decimal,
    /// Current drawdown from peak equity
    pub drawdown: Decimal,
    /// Worst collaborator error rate, if any has enough samples
    pub worst_api: Option<ApiHealth>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiHealth {
    pub source: String,
    pub error_rate: Decimal,
    pub samples: usize,
}

/// Tracks input freshness and collaborator health
pub struct DataQualityMonitor {
    config: SurveillanceConfig,
    /// Latest received_at per instrument
    last_seen: DashMap<InstrumentId, Timestamp>,
    /// Rolling outcomes per collaborator (true = success)
    outcomes: DashMap<String, VecDeque<bool>>,
}

impl DataQualityMonitor {
    pub fn new(config: SurveillanceConfig) -> Self {
        Self {
            config,
            last_seen: DashMap::new(),
            outcomes: DashMap::new(),
        }
    }

    /// Note an observation arrival; out-of-order arrivals never move time back
    pub fn record_observation(&self, instrument_id: &InstrumentId, received_at: Timestamp) {
        self.last_seen
            .entry(instrument_id.clone())
            .and_modify(|seen| {
                if received_at > *seen {
                    *seen = received_at;
                }
            })
            .or_insert(received_at);
    }

    /// Record one call outcome for a collaborator (broker, data source)
    pub fn record_api_outcome(&self, source: &str, success: bool) {
        let mut window = self.outcomes.entry(source.to_string()).or_default();
        window.push_back(success);
        while window.len() > self.config.api_window.max(1) {
            window.pop_front();
        }
        if !success {
            debug!(
                "[SURVEILLANCE] {} failure ({} failures in last {})",
                source,
                window.iter().filter(|ok| !**ok).count(),
                window.len()
            );
        }
    }

    pub fn tracked_instruments(&self) -> usize {
        self.last_seen.len()
    }

    pub fn is_stale(&self, instrument_id: &InstrumentId, now: Timestamp) -> bool {
        self.last_seen
            .get(instrument_id)
            .map(|seen| now - *seen > self.config.instrument_stale_after())
            .unwrap_or(false)
    }

    /// Instruments with no observation within the stale threshold
    pub fn stale_instruments(&self, now: Timestamp) -> Vec<InstrumentId> {
        let threshold = self.config.instrument_stale_after();
        self.last_seen
            .iter()
            .filter(|entry| now - *entry.value() > threshold)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Stale instruments / tracked instruments, zero when nothing is tracked
    pub fn stale_fraction(&self, now: Timestamp) -> Decimal {
        let tracked = self.tracked_instruments();
        if tracked == 0 {
            return Decimal::ZERO;
        }
        Decimal::from(self.stale_instruments(now).len()) / Decimal::from(tracked)
    }

    /// Error rate for one collaborator, `None` below the sample minimum
    pub fn api_error_rate(&self, source: &str) -> Option<Decimal> {
        let window = self.outcomes.get(source)?;
        self.error_rate(&window)
    }

    fn error_rate(&self, window: &VecDeque<bool>) -> Option<Decimal> {
        if window.len() < self.config.api_min_samples.max(1) {
            return None;
        }
        let failures = window.iter().filter(|ok| !**ok).count();
        Some(Decimal::from(failures) / Decimal::from(window.len()))
    }

    /// Collaborator with the highest error rate
    pub fn worst_api(&self) -> Option<ApiHealth> {
        self.outcomes
            .iter()
            .filter_map(|entry| {
                self.error_rate(entry.value()).map(|error_rate| ApiHealth {
                    source: entry.key().clone(),
                    error_rate,
                    samples: entry.value().len(),
                })
            })
            .max_by(|a, b| a.error_rate.cmp(&b.error_rate))
    }

    /// Assemble breaker inputs; drawdown comes from the ledger
    pub fn inputs(&self, now: Timestamp, drawdown: Decimal) -> BreakerInputs {
        BreakerInputs {
            stale_fraction: self.stale_fraction(now),
            drawdown,
            worst_api: self.worst_api(),
        }
    }
}
