//! Signal Registry
//!
//! Authoritative store of signal lifecycle. Confluence windows create
//! candidates; the risk gate and expiry paths move them to a terminal status.
//! Every transition goes through [`Signal::transition`], so a signal can
//! never leave a terminal status.

use chrono::Duration;
use dashmap::DashMap;
use log::debug;
use meridian_core::{ObservationId, Signal, SignalId, SignalStatus, SourceCategory, Timestamp};
use rust_decimal::Decimal;

use crate::error::{Error, Result};

/// A recorded status change
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub signal_id: SignalId,
    pub from: SignalStatus,
    pub to: SignalStatus,
    pub at: Timestamp,
}

#[derive(Default)]
pub struct SignalRegistry {
    signals: DashMap<SignalId, Signal>,
}

impl SignalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, signal: Signal) {
        self.signals.insert(signal.id, signal);
    }

    pub fn get(&self, signal_id: &SignalId) -> Option<Signal> {
        self.signals.get(signal_id).map(|s| s.clone())
    }

    pub fn status(&self, signal_id: &SignalId) -> Option<SignalStatus> {
        self.signals.get(signal_id).map(|s| s.status)
    }

    /// Fold a later agreeing evaluation into an undecided signal
    pub fn strengthen(
        &self,
        signal_id: SignalId,
        confidence: Decimal,
        observations: &[ObservationId],
        categories: &[SourceCategory],
        at: Timestamp,
    ) -> Result<Signal> {
        let mut signal = self
            .signals
            .get_mut(&signal_id)
            .ok_or(Error::UnknownSignal(signal_id))?;
        signal.strengthen(confidence, observations, categories, at)?;
        Ok(signal.clone())
    }

    /// Move a signal to a terminal status
    pub fn transition(
        &self,
        signal_id: SignalId,
        to: SignalStatus,
        at: Timestamp,
    ) -> Result<StatusChange> {
        let mut signal = self
            .signals
            .get_mut(&signal_id)
            .ok_or(Error::UnknownSignal(signal_id))?;
        let from = signal.status;
        signal.transition(to, at)?;
        debug!("[SIGNAL] {} {:?} -> {:?}", signal_id, from, to);
        Ok(StatusChange {
            signal_id,
            from,
            to,
            at,
        })
    }

    /// Signals still awaiting a decision
    pub fn pending(&self) -> Vec<Signal> {
        self.signals
            .iter()
            .filter(|s| s.status == SignalStatus::Generated)
            .map(|s| s.clone())
            .collect()
    }

    /// Drop resolved signals last updated before `now - retention`
    pub fn prune_resolved(&self, now: Timestamp, retention: Duration) -> usize {
        let before = self.signals.len();
        self.signals
            .retain(|_, s| !s.status.is_terminal() || now - s.updated_at <= retention);
        before - self.signals.len()
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }
}
