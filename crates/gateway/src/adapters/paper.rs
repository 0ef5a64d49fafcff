//! Paper broker
//!
//! Simulated broker that fills at the intent's reference price plus
//! slippage. Used by the command-line runner and in tests. Faults
//! (rejections, timeouts, outages) can be injected to exercise the
//! dispatcher's retry path.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use log::{debug, info};
use meridian_core::{
    BrokerOutcome, BrokerRejection, Direction, Fill, IdempotencyKey, OrderIntent,
};
use meridian_ports::{Broker, BrokerError, Clock};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use uuid::Uuid;

/// Configuration for the paper broker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaperBrokerConfig {
    /// Slippage against the reference price, in basis points
    pub slippage_bps: Decimal,
    /// Probability a submission is rejected
    pub reject_probability: f64,
    /// Probability a submission times out
    pub timeout_probability: f64,
    /// Simulated round-trip latency (ms)
    pub latency_ms: u64,
    /// RNG seed, so fault sequences are reproducible
    pub seed: u64,
}

impl Default for PaperBrokerConfig {
    fn default() -> Self {
        Self {
            slippage_bps: dec!(5),
            reject_probability: 0.0,
            timeout_probability: 0.0,
            latency_ms: 0,
            seed: 7,
        }
    }
}

/// In-process broker with idempotent order handling
pub struct PaperBroker {
    config: PaperBrokerConfig,
    clock: Arc<dyn Clock>,
    /// Fills by idempotency key; a repeated key returns the original fill
    fills: DashMap<IdempotencyKey, Fill>,
    rng: Mutex<StdRng>,
    /// Forced outages remaining
    forced_failures: AtomicU32,
    submissions: AtomicU64,
    orders_created: AtomicU64,
}

impl PaperBroker {
    pub fn new(config: PaperBrokerConfig, clock: Arc<dyn Clock>) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            clock,
            fills: DashMap::new(),
            rng: Mutex::new(rng),
            forced_failures: AtomicU32::new(0),
            submissions: AtomicU64::new(0),
            orders_created: AtomicU64::new(0),
        }
    }

    /// Make the next `n` submissions fail as if the broker were down
    pub fn inject_failures(&self, n: u32) {
        self.forced_failures.store(n, Ordering::SeqCst);
    }

    /// Submissions received, including retries and duplicates
    pub fn submissions(&self) -> u64 {
        self.submissions.load(Ordering::SeqCst)
    }

    /// Distinct orders actually created
    pub fn orders_created(&self) -> u64 {
        self.orders_created.load(Ordering::SeqCst)
    }

    pub fn fill_for(&self, key: &IdempotencyKey) -> Option<Fill> {
        self.fills.get(key).map(|f| f.clone())
    }

    fn take_forced_failure(&self) -> bool {
        self.forced_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn fill_price(&self, reference: Decimal, direction: Direction) -> Decimal {
        let slip = reference * self.config.slippage_bps / dec!(10000);
        match direction {
            Direction::Long => reference + slip,
            Direction::Short => reference - slip,
        }
    }
}

#[async_trait]
impl Broker for PaperBroker {
    async fn submit(&self, intent: &OrderIntent) -> Result<BrokerOutcome, BrokerError> {
        self.submissions.fetch_add(1, Ordering::SeqCst);

        if let Some(fill) = self.fills.get(&intent.key) {
            debug!("[PAPER] Duplicate key {}, returning original fill", intent.key);
            return Ok(BrokerOutcome::Filled(fill.clone()));
        }

        if self.config.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.latency_ms)).await;
        }

        if self.take_forced_failure() {
            return Err(BrokerError::Unavailable("injected outage".to_string()));
        }

        let (timed_out, rejected) = {
            let mut rng = self.rng.lock();
            (
                rng.gen_bool(self.config.timeout_probability.clamp(0.0, 1.0)),
                rng.gen_bool(self.config.reject_probability.clamp(0.0, 1.0)),
            )
        };
        if timed_out {
            return Err(BrokerError::Timeout);
        }

        let order_id = Uuid::new_v4();
        let reference = match intent.reference_price {
            Some(price) if !rejected => price,
            Some(_) => {
                return Ok(BrokerOutcome::Rejected(BrokerRejection {
                    order_id,
                    key: intent.key,
                    reason: "simulated rejection".to_string(),
                }));
            }
            None => {
                return Ok(BrokerOutcome::Rejected(BrokerRejection {
                    order_id,
                    key: intent.key,
                    reason: "no reference price".to_string(),
                }));
            }
        };

        let fill = Fill {
            order_id,
            key: intent.key,
            instrument_id: intent.instrument_id.clone(),
            price: self.fill_price(reference, intent.direction),
            size: intent.size,
            timestamp: self.clock.now(),
        };

        // Two concurrent submissions of one key race here; the first insert wins
        match self.fills.entry(intent.key) {
            Entry::Occupied(existing) => Ok(BrokerOutcome::Filled(existing.get().clone())),
            Entry::Vacant(slot) => {
                slot.insert(fill.clone());
                self.orders_created.fetch_add(1, Ordering::SeqCst);
                info!(
                    "[PAPER] Filled {} {} {} @ {} ({:?})",
                    intent.instrument_id, intent.direction, fill.size, fill.price, intent.leg
                );
                Ok(BrokerOutcome::Filled(fill))
            }
        }
    }

    fn name(&self) -> &str {
        "paper"
    }
}
