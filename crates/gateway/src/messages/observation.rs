//! Observation wire format

use crate::error::GatewayError;
use chrono::{DateTime, Utc};
use meridian_core::{
    Observation, ObservationError, ObservationMetadata, SourceCategory, Timestamp,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Normalized observation as delivered by a source collaborator
///
/// `received_at` is normally absent on the wire and stamped by the bus on
/// arrival; replayed records may carry their original value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationMessage {
    /// Instrument the observation is about
    pub instrument_id: String,
    /// Source category
    pub category: SourceCategory,
    /// Directional score in [-1, 1]
    pub score: Decimal,
    /// Category-specific payload
    #[serde(default)]
    pub metadata: ObservationMetadata,
    /// When the source observed it
    pub observed_at: DateTime<Utc>,
    /// When the core received it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_at: Option<DateTime<Utc>>,
}

impl ObservationMessage {
    pub fn new(
        instrument_id: impl Into<String>,
        category: SourceCategory,
        score: Decimal,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            instrument_id: instrument_id.into(),
            category,
            score,
            metadata: ObservationMetadata::Empty,
            observed_at,
            received_at: None,
        }
    }

    /// Builder: Set metadata
    pub fn with_metadata(mut self, metadata: ObservationMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Parse one JSON record
    pub fn from_json(line: &str) -> Result<Self, GatewayError> {
        Ok(serde_json::from_str(line)?)
    }

    /// Validate and convert, stamping `received_at` if the wire left it empty
    pub fn into_observation(self, received_at: Timestamp) -> Result<Observation, ObservationError> {
        Observation::with_metadata(
            self.instrument_id,
            self.category,
            self.score,
            self.metadata,
            self.observed_at,
            self.received_at.unwrap_or(received_at),
        )
    }
}

impl From<&Observation> for ObservationMessage {
    fn from(obs: &Observation) -> Self {
        Self {
            instrument_id: obs.instrument_id.to_string(),
            category: obs.category,
            score: obs.score,
            metadata: obs.metadata.clone(),
            observed_at: obs.observed_at,
            received_at: Some(obs.received_at),
        }
    }
}
