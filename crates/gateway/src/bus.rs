//! Observation Bus
//!
//! Many-writer, single-reader channel carrying normalized observations into
//! the core. Bounded: when the core falls behind, publishers wait for
//! capacity instead of the core buffering without limit.
//!
//! Delivery is at-least-once from the collaborators' side; duplicates pass
//! through untouched and are absorbed by the confluence windows.

use crate::error::{GatewayError, TransportError};
use crate::messages::ObservationMessage;
use crate::transport::{Publisher, Subscriber};
use async_trait::async_trait;
use log::debug;
use meridian_core::{Observation, ObservationId};
use meridian_ports::Clock;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Writer handle, cloned once per source collaborator
#[derive(Clone)]
pub struct ObservationBus {
    tx: mpsc::Sender<Observation>,
    clock: Arc<dyn Clock>,
}

/// Reader side, consumed by the ingestion router
pub struct ObservationStream {
    rx: mpsc::Receiver<Observation>,
}

impl ObservationBus {
    /// Create a bus with the given capacity
    pub fn channel(capacity: usize, clock: Arc<dyn Clock>) -> (Self, ObservationStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, clock }, ObservationStream { rx })
    }

    /// Validate a wire record, stamp its arrival time and enqueue it
    pub async fn submit(&self, msg: ObservationMessage) -> Result<ObservationId, GatewayError> {
        let observation = msg.into_observation(self.clock.now())?;
        let id = observation.id;
        debug!(
            "[BUS] {} {} score={} observed_at={}",
            observation.instrument_id,
            observation.category,
            observation.score,
            observation.observed_at
        );
        self.tx
            .send(observation)
            .await
            .map_err(|_| TransportError::ChannelClosed)?;
        Ok(id)
    }

    /// Free slots before publishers start waiting
    pub fn capacity(&self) -> usize {
        self.tx.capacity()
    }
}

#[async_trait]
impl Publisher<Observation> for ObservationBus {
    async fn publish(&self, msg: &Observation) -> Result<(), TransportError> {
        self.tx
            .send(msg.clone())
            .await
            .map_err(|_| TransportError::ChannelClosed)
    }
}

#[async_trait]
impl Subscriber<Observation> for ObservationStream {
    async fn next(&mut self) -> Result<Observation, TransportError> {
        self.rx.recv().await.ok_or(TransportError::ChannelClosed)
    }

    fn try_next(&mut self) -> Result<Option<Observation>, TransportError> {
        match self.rx.try_recv() {
            Ok(obs) => Ok(Some(obs)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(TransportError::ChannelClosed),
        }
    }
}
