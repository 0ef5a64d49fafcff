use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::{Direction, ObservationId, SourceCategory};
use crate::values::{InstrumentId, Timestamp};

/// Unique identifier for a signal
pub type SignalId = Uuid;

/// Signal lifecycle status
///
/// `Generated` is the only non-terminal state. A signal never leaves a
/// terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalStatus {
    /// Emitted by confluence, awaiting a risk decision
    Generated,
    /// Approved (possibly resized) by the risk gate
    Approved,
    /// Rejected by the risk gate
    Rejected,
    /// Withdrawn before a decision (conflict, data staleness, ttl)
    Expired,
}

impl SignalStatus {
    /// Returns true if the signal is in a terminal state
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SignalStatus::Generated)
    }

    /// Whether `self -> to` is a legal transition
    pub fn can_transition_to(&self, to: SignalStatus) -> bool {
        matches!(self, SignalStatus::Generated) && to.is_terminal()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Signal {signal_id}: illegal status transition {from:?} -> {to:?}")]
pub struct StatusTransitionError {
    pub signal_id: SignalId,
    pub from: SignalStatus,
    pub to: SignalStatus,
}

/// A directional trading hypothesis derived from confluent observations
///
/// Holds observation ids, never the observations themselves; the confluence
/// window owns those.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: SignalId,
    pub instrument_id: InstrumentId,
    pub direction: Direction,
    /// Confidence in [0, 1]
    pub confidence: Decimal,
    /// Observations that contributed, always non-empty
    pub observations: Vec<ObservationId>,
    /// Distinct categories that agreed
    pub categories: Vec<SourceCategory>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub status: SignalStatus,
}

impl Signal {
    pub fn new(
        instrument_id: impl Into<InstrumentId>,
        direction: Direction,
        confidence: Decimal,
        observations: Vec<ObservationId>,
        categories: Vec<SourceCategory>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            instrument_id: instrument_id.into(),
            direction,
            confidence: confidence.clamp(Decimal::ZERO, Decimal::ONE),
            observations,
            categories,
            created_at,
            updated_at: created_at,
            status: SignalStatus::Generated,
        }
    }

    /// Move to a terminal status
    pub fn transition(
        &mut self,
        to: SignalStatus,
        at: Timestamp,
    ) -> Result<(), StatusTransitionError> {
        if !self.status.can_transition_to(to) {
            return Err(StatusTransitionError {
                signal_id: self.id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = at;
        Ok(())
    }

    /// Fold a later agreeing evaluation into this candidate
    ///
    /// Confidence only ever rises. Contributing ids and categories are merged.
    pub fn strengthen(
        &mut self,
        confidence: Decimal,
        observations: &[ObservationId],
        categories: &[SourceCategory],
        at: Timestamp,
    ) -> Result<(), StatusTransitionError> {
        if self.status.is_terminal() {
            return Err(StatusTransitionError {
                signal_id: self.id,
                from: self.status,
                to: SignalStatus::Generated,
            });
        }
        self.confidence = self
            .confidence
            .max(confidence.clamp(Decimal::ZERO, Decimal::ONE));
        for id in observations {
            if !self.observations.contains(id) {
                self.observations.push(*id);
            }
        }
        for category in categories {
            if !self.categories.contains(category) {
                self.categories.push(*category);
            }
        }
        self.updated_at = at;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn signal() -> Signal {
        Signal::new(
            "XYZ",
            Direction::Long,
            dec!(0.6),
            vec![Uuid::new_v4()],
            vec![SourceCategory::News],
            Utc::now(),
        )
    }

    #[test]
    fn test_terminal_states_never_regress() {
        let mut s = signal();
        s.transition(SignalStatus::Approved, Utc::now()).unwrap();

        for to in [
            SignalStatus::Generated,
            SignalStatus::Rejected,
            SignalStatus::Expired,
            SignalStatus::Approved,
        ] {
            assert!(s.transition(to, Utc::now()).is_err());
        }
        assert_eq!(s.status, SignalStatus::Approved);
    }

    #[test]
    fn test_strengthen_only_raises() {
        let mut s = signal();
        let extra = Uuid::new_v4();
        s.strengthen(dec!(0.4), &[extra], &[SourceCategory::Social], Utc::now())
            .unwrap();
        assert_eq!(s.confidence, dec!(0.6));
        assert_eq!(s.observations.len(), 2);
        assert_eq!(s.categories.len(), 2);

        s.strengthen(dec!(0.8), &[extra], &[], Utc::now()).unwrap();
        assert_eq!(s.confidence, dec!(0.8));
        assert_eq!(s.observations.len(), 2);
    }

    #[test]
    fn test_cannot_strengthen_resolved_signal() {
        let mut s = signal();
        s.transition(SignalStatus::Expired, Utc::now()).unwrap();
        assert!(s.strengthen(dec!(0.9), &[], &[], Utc::now()).is_err());
        assert_eq!(s.confidence, dec!(0.6));
    }
}
