//! Execution Dispatcher
//!
//! Turns approved decisions into idempotent order intents for the broker
//! collaborator and reconciles fills back into the ledger.
//!
//! ## Idempotency
//!
//! Every intent carries `IdempotencyKey::derive(signal_id, leg)`. The
//! dispatcher keeps a table keyed by it: a redelivered decision whose key is
//! in flight or completed is never resubmitted, and the broker port honours
//! the same key, so a retried submission cannot create a second order.
//!
//! ## Retry
//!
//! ```text
//! attempt 1 ──fail──► sleep 200ms ──► attempt 2 ──fail──► sleep 400ms ──► ...
//!                                                     max_attempts reached
//!                                                              │
//!                                   release reservation, alert ExecutionFailure
//! ```
//!
//! A rejection or timeout never touches the ledger; each failed attempt is
//! announced as `dispatch_failed`. A failed opening leg stays failed for its
//! signal. A failed closing leg frees its key, so the position can be closed
//! again once the broker recovers.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use log::{error, info, warn};
use meridian_core::{
    Alert, BrokerOutcome, Fill, IdempotencyKey, OrderIntent, OrderLeg, Position, PositionId,
    RiskDecision, Timestamp,
};
use meridian_gateway::{ChannelPublisher, Publisher};
use meridian_ports::{AlertSink, Broker, Clock};
use meridian_risk_manager::{DataQualityMonitor, SurveillanceConfig};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::events::CoreEvent;
use crate::position::PositionLedger;

/// Retry and timeout settings for broker submissions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: u32,
    pub max_backoff_ms: u64,
    /// Per-attempt broker timeout
    pub attempt_timeout_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff_ms: 200,
            backoff_multiplier: 2,
            max_backoff_ms: 5_000,
            attempt_timeout_ms: 10_000,
        }
    }
}

impl DispatchConfig {
    /// Delay after failed attempt `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let mut ms = self.initial_backoff_ms;
        for _ in 1..attempt {
            ms = ms.saturating_mul(self.backoff_multiplier as u64);
        }
        Duration::from_millis(ms.min(self.max_backoff_ms))
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_attempts == 0 {
            return Err("dispatch.max_attempts must be at least 1".to_string());
        }
        if self.attempt_timeout_ms == 0 {
            return Err("dispatch.attempt_timeout_ms must be positive".to_string());
        }
        Ok(())
    }
}

/// Where an idempotency key stands
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchState {
    InFlight,
    /// Position as opened or closed by this key
    Completed(Position),
    Failed { attempts: u32, reason: String },
}

/// Key state and when it last changed
struct KeyRecord {
    state: DispatchState,
    updated_at: Timestamp,
}

struct Exhausted {
    attempts: u32,
    reason: String,
}

pub struct ExecutionDispatcher {
    config: DispatchConfig,
    broker: Arc<dyn Broker>,
    ledger: Arc<PositionLedger>,
    monitor: Arc<DataQualityMonitor>,
    events: ChannelPublisher<CoreEvent>,
    alerts: Arc<dyn AlertSink>,
    clock: Arc<dyn Clock>,
    entries: DashMap<IdempotencyKey, KeyRecord>,
}

impl ExecutionDispatcher {
    pub fn new(
        config: DispatchConfig,
        broker: Arc<dyn Broker>,
        ledger: Arc<PositionLedger>,
        alerts: Arc<dyn AlertSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            broker,
            ledger,
            monitor: Arc::new(DataQualityMonitor::new(SurveillanceConfig::default())),
            events: ChannelPublisher::new(64),
            alerts,
            clock,
            entries: DashMap::new(),
        }
    }

    /// Report broker outcomes to a shared surveillance monitor
    pub fn with_monitor(mut self, monitor: Arc<DataQualityMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    /// Announce dispatch events on a shared channel
    pub fn with_events(mut self, events: ChannelPublisher<CoreEvent>) -> Self {
        self.events = events;
        self
    }

    pub fn state(&self, key: &IdempotencyKey) -> Option<DispatchState> {
        self.entries.get(key).map(|e| e.state.clone())
    }

    /// Keys currently tracked, in flight or settled
    pub fn tracked_keys(&self) -> usize {
        self.entries.len()
    }

    /// Forget settled keys last updated before `cutoff`; in-flight keys stay
    pub fn prune_settled(&self, cutoff: Timestamp) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            matches!(entry.state, DispatchState::InFlight) || entry.updated_at >= cutoff
        });
        before - self.entries.len()
    }

    fn settle(&self, key: IdempotencyKey, state: DispatchState) {
        self.entries.insert(
            key,
            KeyRecord {
                state,
                updated_at: self.clock.now(),
            },
        );
    }

    /// Claim a key; `Some` when it already completed
    fn claim(&self, key: IdempotencyKey) -> Result<Option<Position>> {
        match self.entries.entry(key) {
            Entry::Occupied(entry) => match &entry.get().state {
                DispatchState::InFlight => Err(Error::DispatchInFlight(key)),
                DispatchState::Completed(position) => {
                    info!("[DISPATCH] {} already completed, not resubmitting", key);
                    Ok(Some(position.clone()))
                }
                DispatchState::Failed { attempts, reason } => Err(Error::ExecutionFailure {
                    key,
                    attempts: *attempts,
                    reason: reason.clone(),
                }),
            },
            Entry::Vacant(slot) => {
                slot.insert(KeyRecord {
                    state: DispatchState::InFlight,
                    updated_at: self.clock.now(),
                });
                Ok(None)
            }
        }
    }

    /// Send the opening order for an approved decision and open the position
    pub async fn dispatch_open(&self, decision: &RiskDecision) -> Result<Position> {
        if !decision.is_approved() {
            return Err(Error::RiskRejected {
                signal_id: decision.signal_id,
                reason: decision.reason,
            });
        }

        let key = IdempotencyKey::derive(decision.signal_id, OrderLeg::Open);
        if let Some(position) = self.claim(key)? {
            return Ok(position);
        }

        let intent = OrderIntent {
            key,
            signal_id: decision.signal_id,
            leg: OrderLeg::Open,
            instrument_id: decision.instrument_id.clone(),
            direction: decision.direction,
            size: decision.size,
            stop_loss: decision.stop_loss,
            reference_price: decision.entry_price,
            position_id: None,
            created_at: self.clock.now(),
        };

        let fill = match self.submit_with_retry(&intent).await {
            Ok(fill) => fill,
            Err(exhausted) => {
                self.ledger.release(&decision.signal_id);
                return Err(self.fail(&intent, exhausted).await);
            }
        };

        match self.ledger.open(decision, &fill) {
            Ok(position) => {
                self.settle(key, DispatchState::Completed(position.clone()));
                self.publish(CoreEvent::PositionOpened(position.clone()))
                    .await;
                Ok(position)
            }
            Err(e) => {
                self.ledger.release(&decision.signal_id);
                self.settle(
                    key,
                    DispatchState::Failed {
                        attempts: 1,
                        reason: e.to_string(),
                    },
                );
                self.notify(Alert::InvariantViolation {
                    detail: format!("fill {} for {} refused: {}", fill.order_id, key, e),
                    at: self.clock.now(),
                })
                .await;
                Err(e)
            }
        }
    }

    /// Send the closing order for an open position and close it on fill
    pub async fn dispatch_close(&self, position_id: PositionId) -> Result<Position> {
        let position = self
            .ledger
            .position(&position_id)
            .ok_or(Error::UnknownPosition(position_id))?;

        let key = IdempotencyKey::derive(position.signal_id, OrderLeg::Close);
        if let Some(closed) = self.claim(key)? {
            return Ok(closed);
        }
        if !position.is_open() {
            self.entries.remove(&key);
            return Err(Error::UnknownPosition(position_id));
        }

        let intent = OrderIntent {
            key,
            signal_id: position.signal_id,
            leg: OrderLeg::Close,
            instrument_id: position.instrument_id.clone(),
            direction: position.direction().opposite(),
            size: position.size.abs(),
            stop_loss: None,
            reference_price: self
                .ledger
                .volatility()
                .reference_price(&position.instrument_id),
            position_id: Some(position_id),
            created_at: self.clock.now(),
        };

        let fill = match self.submit_with_retry(&intent).await {
            Ok(fill) => fill,
            Err(exhausted) => {
                self.ledger.abandon_close(&position_id);
                return Err(self.fail(&intent, exhausted).await);
            }
        };

        match self.ledger.close(&position_id, fill.price, fill.timestamp) {
            Ok(closed) => {
                self.settle(key, DispatchState::Completed(closed.clone()));
                self.publish(CoreEvent::PositionClosed(closed.clone())).await;
                Ok(closed)
            }
            Err(e) => {
                self.entries.remove(&key);
                Err(e)
            }
        }
    }

    async fn submit_with_retry(&self, intent: &OrderIntent) -> std::result::Result<Fill, Exhausted> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut reason = String::new();

        for attempt in 1..=max_attempts {
            let submitted =
                tokio::time::timeout(self.config.attempt_timeout(), self.broker.submit(intent))
                    .await;

            reason = match submitted {
                Ok(Ok(BrokerOutcome::Filled(fill))) => {
                    self.monitor.record_api_outcome(self.broker.name(), true);
                    return Ok(fill);
                }
                Ok(Ok(BrokerOutcome::Rejected(rejection))) => {
                    self.monitor.record_api_outcome(self.broker.name(), true);
                    format!("rejected: {}", rejection.reason)
                }
                Ok(Err(e)) => {
                    self.monitor.record_api_outcome(self.broker.name(), false);
                    e.to_string()
                }
                Err(_) => {
                    self.monitor.record_api_outcome(self.broker.name(), false);
                    format!("no response within {:?}", self.config.attempt_timeout())
                }
            };

            let failure = Error::DispatchFailed {
                key: intent.key,
                attempt,
                reason: reason.clone(),
            };
            warn!(
                "[DISPATCH] {} {:?} ({}/{}): {}",
                intent.instrument_id, intent.leg, attempt, max_attempts, failure
            );
            self.publish(CoreEvent::DispatchFailed {
                key: intent.key,
                signal_id: intent.signal_id,
                attempt,
                reason: reason.clone(),
            })
            .await;

            if attempt < max_attempts {
                tokio::time::sleep(self.config.backoff(attempt)).await;
            }
        }

        Err(Exhausted {
            attempts: max_attempts,
            reason,
        })
    }

    async fn fail(&self, intent: &OrderIntent, exhausted: Exhausted) -> Error {
        error!(
            "[DISPATCH] EXECUTION FAILURE {} {} {:?} after {} attempts: {}",
            intent.key, intent.instrument_id, intent.leg, exhausted.attempts, exhausted.reason
        );
        match intent.leg {
            OrderLeg::Open => self.settle(
                intent.key,
                DispatchState::Failed {
                    attempts: exhausted.attempts,
                    reason: exhausted.reason.clone(),
                },
            ),
            // The position is still open and must stay closable
            OrderLeg::Close => {
                self.entries.remove(&intent.key);
            }
        }
        self.publish(CoreEvent::ExecutionFailure {
            key: intent.key,
            signal_id: intent.signal_id,
            attempts: exhausted.attempts,
            reason: exhausted.reason.clone(),
        })
        .await;
        self.notify(Alert::ExecutionFailure {
            key: intent.key,
            signal_id: intent.signal_id,
            attempts: exhausted.attempts,
            reason: exhausted.reason.clone(),
            at: self.clock.now(),
        })
        .await;

        Error::ExecutionFailure {
            key: intent.key,
            attempts: exhausted.attempts,
            reason: exhausted.reason,
        }
    }

    async fn publish(&self, event: CoreEvent) {
        let _ = self.events.publish(&event).await;
    }

    async fn notify(&self, alert: Alert) {
        if let Err(e) = self.alerts.notify(&alert).await {
            error!("[DISPATCH] Alert delivery failed ({}): {}", e, alert);
        }
    }
}
