//! Observations - normalized data points delivered by source collaborators
//!
//! Source categories are a closed enumeration so confluence scoring can match
//! on them exhaustively. Metadata is a tagged variant per category rather than
//! a free-form map.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::Direction;
use crate::values::{InstrumentId, Price, Timestamp};

/// Deterministic identifier of an observation
///
/// Derived from the observation's content, so an at-least-once redelivery of
/// the same record maps to the same id.
pub type ObservationId = Uuid;

const OBSERVATION_NAMESPACE: Uuid = Uuid::from_u128(0x6d65_7269_6469_616e_0001_6f62_7365_7276);

/// Independent source categories that can take part in confluence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceCategory {
    OptionsFlow,
    Filings,
    News,
    Social,
    Economic,
    Price,
}

impl SourceCategory {
    /// Bumped whenever a category is added or removed
    pub const SCHEMA_VERSION: u32 = 1;

    pub const ALL: [SourceCategory; 6] = [
        SourceCategory::OptionsFlow,
        SourceCategory::Filings,
        SourceCategory::News,
        SourceCategory::Social,
        SourceCategory::Economic,
        SourceCategory::Price,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceCategory::OptionsFlow => "options_flow",
            SourceCategory::Filings => "filings",
            SourceCategory::News => "news",
            SourceCategory::Social => "social",
            SourceCategory::Economic => "economic",
            SourceCategory::Price => "price",
        }
    }
}

impl std::fmt::Display for SourceCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractKind {
    Call,
    Put,
}

/// OHLC bar carried by price observations
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
}

impl PriceBar {
    /// A bar with a single traded price
    pub fn flat(price: Price) -> Self {
        Self {
            open: price,
            high: price,
            low: price,
            close: price,
        }
    }
}

/// Structured metadata, one variant per source category
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObservationMetadata {
    /// No structured payload beyond the score
    #[default]
    Empty,
    OptionsFlow {
        contract: ContractKind,
        premium: Decimal,
        volume: u64,
        open_interest: u64,
    },
    Filing {
        form_type: String,
        filer: String,
    },
    News {
        headline: String,
        publisher: String,
    },
    Social {
        platform: String,
        mentions: u64,
    },
    Economic {
        indicator: String,
        actual: Decimal,
        consensus: Decimal,
    },
    Price(PriceBar),
}

impl ObservationMetadata {
    /// Category this metadata belongs to, `None` for the empty payload
    pub fn category(&self) -> Option<SourceCategory> {
        match self {
            ObservationMetadata::Empty => None,
            ObservationMetadata::OptionsFlow { .. } => Some(SourceCategory::OptionsFlow),
            ObservationMetadata::Filing { .. } => Some(SourceCategory::Filings),
            ObservationMetadata::News { .. } => Some(SourceCategory::News),
            ObservationMetadata::Social { .. } => Some(SourceCategory::Social),
            ObservationMetadata::Economic { .. } => Some(SourceCategory::Economic),
            ObservationMetadata::Price(_) => Some(SourceCategory::Price),
        }
    }

    pub fn price_bar(&self) -> Option<&PriceBar> {
        match self {
            ObservationMetadata::Price(bar) => Some(bar),
            _ => None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ObservationError {
    #[error("Score {0} outside [-1, 1]")]
    ScoreOutOfRange(Decimal),

    #[error("Metadata for {metadata} attached to a {category} observation")]
    MetadataMismatch {
        category: SourceCategory,
        metadata: SourceCategory,
    },

    #[error("Empty instrument id")]
    EmptyInstrument,

    #[error("Invalid price bar: {0}")]
    InvalidPriceBar(String),
}

/// A single normalized, timestamped data point about one instrument
///
/// Immutable once created. `observed_at` orders the window; `received_at`
/// only bounds staleness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub id: ObservationId,
    pub instrument_id: InstrumentId,
    pub category: SourceCategory,
    pub score: Decimal,
    pub metadata: ObservationMetadata,
    pub observed_at: Timestamp,
    pub received_at: Timestamp,
}

impl Observation {
    /// Create an observation without structured metadata
    pub fn new(
        instrument_id: impl Into<InstrumentId>,
        category: SourceCategory,
        score: Decimal,
        observed_at: Timestamp,
        received_at: Timestamp,
    ) -> Result<Self, ObservationError> {
        Self::with_metadata(
            instrument_id,
            category,
            score,
            ObservationMetadata::Empty,
            observed_at,
            received_at,
        )
    }

    /// Create an observation with a category-specific payload
    pub fn with_metadata(
        instrument_id: impl Into<InstrumentId>,
        category: SourceCategory,
        score: Decimal,
        metadata: ObservationMetadata,
        observed_at: Timestamp,
        received_at: Timestamp,
    ) -> Result<Self, ObservationError> {
        let instrument_id = instrument_id.into();
        if instrument_id.as_str().is_empty() {
            return Err(ObservationError::EmptyInstrument);
        }
        if score < Decimal::NEGATIVE_ONE || score > Decimal::ONE {
            return Err(ObservationError::ScoreOutOfRange(score));
        }
        if let Some(meta_category) = metadata.category()
            && meta_category != category
        {
            return Err(ObservationError::MetadataMismatch {
                category,
                metadata: meta_category,
            });
        }
        if let Some(bar) = metadata.price_bar()
            && (bar.low > bar.high || bar.low <= Decimal::ZERO)
        {
            return Err(ObservationError::InvalidPriceBar(format!(
                "low={} high={}",
                bar.low, bar.high
            )));
        }

        let id = Self::derive_id(&instrument_id, category, score, observed_at);
        Ok(Self {
            id,
            instrument_id,
            category,
            score,
            metadata,
            observed_at,
            received_at,
        })
    }

    fn derive_id(
        instrument_id: &InstrumentId,
        category: SourceCategory,
        score: Decimal,
        observed_at: Timestamp,
    ) -> ObservationId {
        let name = format!(
            "{}|{}|{}|{}",
            instrument_id,
            category.as_str(),
            observed_at.timestamp_micros(),
            score.normalize()
        );
        Uuid::new_v5(&OBSERVATION_NAMESPACE, name.as_bytes())
    }

    /// Direction implied by the score, `None` when neutral
    pub fn direction(&self) -> Option<Direction> {
        Direction::from_score(self.score)
    }

    /// Age relative to `now`, measured from the observation time
    pub fn age(&self, now: Timestamp) -> chrono::Duration {
        now - self.observed_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn t0() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 3, 1, 14, 30, 0).unwrap()
    }

    #[test]
    fn test_redelivery_has_same_id() {
        let a = Observation::new("XYZ", SourceCategory::News, dec!(0.5), t0(), t0()).unwrap();
        let b = Observation::new(
            "XYZ",
            SourceCategory::News,
            dec!(0.50),
            t0(),
            t0() + Duration::seconds(3),
        )
        .unwrap();
        assert_eq!(a.id, b.id);

        let c = Observation::new("XYZ", SourceCategory::Social, dec!(0.5), t0(), t0()).unwrap();
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn test_score_range() {
        let err = Observation::new("XYZ", SourceCategory::News, dec!(1.2), t0(), t0()).unwrap_err();
        assert_eq!(err, ObservationError::ScoreOutOfRange(dec!(1.2)));
        assert!(Observation::new("XYZ", SourceCategory::News, dec!(-1), t0(), t0()).is_ok());
    }

    #[test]
    fn test_metadata_must_match_category() {
        let meta = ObservationMetadata::Social {
            platform: "reddit".to_string(),
            mentions: 120,
        };
        let err = Observation::with_metadata("XYZ", SourceCategory::News, dec!(0.2), meta, t0(), t0())
            .unwrap_err();
        assert!(matches!(err, ObservationError::MetadataMismatch { .. }));
    }

    #[test]
    fn test_neutral_score_has_no_direction() {
        let obs = Observation::new("XYZ", SourceCategory::Economic, dec!(0), t0(), t0()).unwrap();
        assert_eq!(obs.direction(), None);
    }

    #[test]
    fn test_metadata_wire_shape() {
        let meta = ObservationMetadata::Price(PriceBar::flat(dec!(101.5)));
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["kind"], "price");
        assert_eq!(SourceCategory::OptionsFlow.to_string(), "options_flow");
    }
}
