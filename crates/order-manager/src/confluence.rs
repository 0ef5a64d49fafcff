//! Confluence Engine
//!
//! Keeps a sliding window of observations per instrument and emits a
//! candidate [`Signal`] once enough *distinct* source categories agree in
//! direction.
//!
//! ## Confidence
//!
//! ```text
//! decay(age)     = exp(-λ · age),   λ = ln(1 / decay_floor) / staleness_cutoff
//! contribution_c = max over category c of |score| · decay(age)
//! confidence     = count_weight     · min(1, n_agree / saturation_categories)
//!                + magnitude_weight · Σ w_c · contribution_c / Σ w_c
//! ```
//!
//! ## Rules
//!
//! - Observations of both signs in one window suppress emission entirely and
//!   expire any undecided candidate (no whipsaw signals)
//! - At most one open candidate per direction; later agreement only
//!   strengthens it
//! - Duplicate deliveries (same observation id) are absorbed
//! - An instrument with no fresh data is marked data-stale and emits nothing
//!   until a new observation arrives
//!
//! A window has exactly one writer: the pipeline gives each instrument its
//! own worker task. [`ConfluenceEngine`] wraps a map of windows for
//! single-threaded use.

use chrono::Duration;
use log::{debug, info, warn};
use meridian_core::{
    Direction, InstrumentId, Observation, ObservationId, Signal, SignalId, SourceCategory,
    Timestamp,
};
use rust_decimal::{Decimal, MathematicalOps};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Configuration for confluence detection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfluenceConfig {
    /// Window length measured back from the newest observation (ms)
    pub window_ms: u64,
    /// Observations older than this are evicted (ms)
    pub staleness_cutoff_ms: u64,
    /// Distinct categories that must agree before a signal is emitted
    pub min_agreeing_categories: usize,
    /// Weight of the agreeing-category count term
    pub count_weight: Decimal,
    /// Weight of the decayed magnitude term
    pub magnitude_weight: Decimal,
    /// Number of agreeing categories at which the count term saturates
    pub saturation_categories: usize,
    /// Decay factor reached at the staleness cutoff
    pub decay_floor: Decimal,
    /// Per-category weights in the magnitude mean (missing = 1)
    pub category_weights: HashMap<SourceCategory, Decimal>,
    /// No observation received for this long marks the instrument data-stale (ms)
    pub instrument_stale_after_ms: u64,
    /// Candidates still undecided after this long expire (ms)
    pub signal_ttl_ms: u64,
}

impl Default for ConfluenceConfig {
    fn default() -> Self {
        Self {
            window_ms: 600_000,
            staleness_cutoff_ms: 900_000,
            min_agreeing_categories: 3,
            count_weight: dec!(0.5),
            magnitude_weight: dec!(0.5),
            saturation_categories: 4,
            decay_floor: dec!(0.05),
            category_weights: HashMap::new(),
            instrument_stale_after_ms: 1_800_000,
            signal_ttl_ms: 300_000,
        }
    }
}

impl ConfluenceConfig {
    pub fn window(&self) -> Duration {
        Duration::milliseconds(self.window_ms as i64)
    }

    pub fn staleness_cutoff(&self) -> Duration {
        Duration::milliseconds(self.staleness_cutoff_ms as i64)
    }

    pub fn instrument_stale_after(&self) -> Duration {
        Duration::milliseconds(self.instrument_stale_after_ms as i64)
    }

    pub fn signal_ttl(&self) -> Duration {
        Duration::milliseconds(self.signal_ttl_ms as i64)
    }

    pub fn category_weight(&self, category: SourceCategory) -> Decimal {
        self.category_weights
            .get(&category)
            .copied()
            .unwrap_or(Decimal::ONE)
    }

    /// Decay rate per millisecond of age
    pub fn decay_rate(&self) -> Decimal {
        if self.staleness_cutoff_ms == 0
            || self.decay_floor <= Decimal::ZERO
            || self.decay_floor >= Decimal::ONE
        {
            return Decimal::ZERO;
        }
        (Decimal::ONE / self.decay_floor)
            .checked_ln()
            .map(|ln| ln / Decimal::from(self.staleness_cutoff_ms))
            .unwrap_or(Decimal::ZERO)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.window_ms == 0 {
            return Err("confluence.window_ms must be positive".to_string());
        }
        if self.staleness_cutoff_ms == 0 {
            return Err("confluence.staleness_cutoff_ms must be positive".to_string());
        }
        if self.min_agreeing_categories == 0 {
            return Err("confluence.min_agreeing_categories must be at least 1".to_string());
        }
        if self.decay_floor <= Decimal::ZERO || self.decay_floor >= Decimal::ONE {
            return Err("confluence.decay_floor must be in (0, 1)".to_string());
        }
        if self.count_weight < Decimal::ZERO || self.magnitude_weight < Decimal::ZERO {
            return Err("confluence weights must be non-negative".to_string());
        }
        if self.category_weights.values().any(|w| *w < Decimal::ZERO) {
            return Err("confluence.category_weights must be non-negative".to_string());
        }
        Ok(())
    }
}

/// Why an observation produced no new or strengthened signal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SuppressionReason {
    /// Both directions present in the window
    Conflict,
    /// Not enough distinct categories agree yet
    InsufficientCategories { have: usize, need: usize },
    /// Instrument marked data-stale
    DataStale,
    /// Same observation already in the window
    Duplicate,
    /// Arrived already past the staleness cutoff
    StaleObservation,
}

/// Result of feeding one observation to a window
#[derive(Debug, Clone, PartialEq)]
pub enum ConfluenceOutcome {
    /// A new candidate signal
    Emitted(Signal),
    /// An open candidate absorbed the agreement
    Strengthened {
        signal_id: SignalId,
        confidence: Decimal,
        observations: Vec<ObservationId>,
        categories: Vec<SourceCategory>,
    },
    Suppressed {
        reason: SuppressionReason,
        /// Candidates withdrawn as a consequence (conflict)
        expired: Vec<SignalId>,
    },
}

impl ConfluenceOutcome {
    fn suppressed(reason: SuppressionReason) -> Self {
        ConfluenceOutcome::Suppressed {
            reason,
            expired: Vec::new(),
        }
    }
}

/// Result of a housekeeping pass over a window
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickOutcome {
    /// Candidates withdrawn on this pass (data staleness or ttl)
    pub expired: Vec<SignalId>,
    /// The instrument became data-stale on this pass
    pub became_stale: bool,
}

#[derive(Debug, Clone)]
struct Candidate {
    signal_id: SignalId,
    confidence: Decimal,
    created_at: Timestamp,
}

/// Aggregated view of one direction in the window
struct DirectionScore {
    /// Strongest decayed magnitude per category
    contributions: BTreeMap<SourceCategory, Decimal>,
    observations: Vec<ObservationId>,
}

/// Sliding window for a single instrument
pub struct InstrumentWindow {
    instrument_id: InstrumentId,
    config: Arc<ConfluenceConfig>,
    decay_rate: Decimal,
    /// Sorted by observed_at
    observations: Vec<Observation>,
    candidates: HashMap<Direction, Candidate>,
    last_received: Option<Timestamp>,
    data_stale: bool,
}

impl InstrumentWindow {
    pub fn new(instrument_id: InstrumentId, config: Arc<ConfluenceConfig>) -> Self {
        let decay_rate = config.decay_rate();
        Self {
            instrument_id,
            config,
            decay_rate,
            observations: Vec::new(),
            candidates: HashMap::new(),
            last_received: None,
            data_stale: false,
        }
    }

    pub fn instrument_id(&self) -> &InstrumentId {
        &self.instrument_id
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn is_data_stale(&self) -> bool {
        self.data_stale
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    /// Open candidate for a direction, if any
    pub fn open_candidate(&self, direction: Direction) -> Option<SignalId> {
        self.candidates.get(&direction).map(|c| c.signal_id)
    }

    /// Feed one observation and re-evaluate confluence
    pub fn ingest(&mut self, observation: Observation, now: Timestamp) -> ConfluenceOutcome {
        self.evict(now);

        if observation.age(now) > self.config.staleness_cutoff() {
            debug!(
                "[CONFLUENCE] {} {} observation {} arrived past the cutoff",
                self.instrument_id, observation.category, observation.id
            );
            return ConfluenceOutcome::suppressed(SuppressionReason::StaleObservation);
        }

        if self.last_received.is_none_or(|seen| observation.received_at > seen) {
            self.last_received = Some(observation.received_at);
        }
        if self.data_stale {
            info!("[CONFLUENCE] {} has fresh data again", self.instrument_id);
            self.data_stale = false;
        }

        if self.observations.iter().any(|o| o.id == observation.id) {
            return ConfluenceOutcome::suppressed(SuppressionReason::Duplicate);
        }

        let at = self
            .observations
            .partition_point(|o| o.observed_at <= observation.observed_at);
        self.observations.insert(at, observation);
        self.evict(now);

        self.evaluate(now)
    }

    /// Free the candidate slot once its signal reaches a terminal status
    pub fn resolve(&mut self, signal_id: SignalId) -> bool {
        let before = self.candidates.len();
        self.candidates.retain(|_, c| c.signal_id != signal_id);
        before != self.candidates.len()
    }

    /// Evict aged observations, detect data staleness, expire old candidates
    pub fn tick(&mut self, now: Timestamp) -> TickOutcome {
        self.evict(now);
        let mut outcome = TickOutcome::default();

        if !self.data_stale
            && let Some(seen) = self.last_received
            && now - seen > self.config.instrument_stale_after()
        {
            warn!(
                "[CONFLUENCE] {} is data-stale (last observation received {})",
                self.instrument_id, seen
            );
            self.data_stale = true;
            outcome.became_stale = true;
            outcome.expired = self.expire_all();
            return outcome;
        }

        let ttl = self.config.signal_ttl();
        let mut expired = Vec::new();
        self.candidates.retain(|_, c| {
            let keep = now - c.created_at <= ttl;
            if !keep {
                expired.push(c.signal_id);
            }
            keep
        });
        if !expired.is_empty() {
            debug!(
                "[CONFLUENCE] {} expired {} candidate(s) past ttl",
                self.instrument_id,
                expired.len()
            );
        }
        outcome.expired = expired;
        outcome
    }

    fn expire_all(&mut self) -> Vec<SignalId> {
        self.candidates.drain().map(|(_, c)| c.signal_id).collect()
    }

    fn evict(&mut self, now: Timestamp) {
        let cutoff = self.config.staleness_cutoff();
        let window = self.config.window();
        let Some(newest) = self.observations.last().map(|o| o.observed_at) else {
            return;
        };
        self.observations
            .retain(|o| now - o.observed_at <= cutoff && newest - o.observed_at <= window);
    }

    fn decay(&self, observation: &Observation, now: Timestamp) -> Decimal {
        let age_ms = observation.age(now).num_milliseconds().max(0);
        if age_ms == 0 || self.decay_rate.is_zero() {
            return Decimal::ONE;
        }
        (self.decay_rate * Decimal::from(age_ms))
            .checked_exp()
            .map(|growth| Decimal::ONE / growth)
            .unwrap_or(Decimal::ZERO)
    }

    fn score(&self, direction: Direction, now: Timestamp) -> DirectionScore {
        let mut score = DirectionScore {
            contributions: BTreeMap::new(),
            observations: Vec::new(),
        };
        for observation in &self.observations {
            if observation.direction() != Some(direction) {
                continue;
            }
            let magnitude = observation.score.abs() * self.decay(observation, now);
            let best = score
                .contributions
                .entry(observation.category)
                .or_insert(Decimal::ZERO);
            *best = (*best).max(magnitude);
            score.observations.push(observation.id);
        }
        score
    }

    fn confidence(&self, score: &DirectionScore) -> Decimal {
        let agreeing = score.contributions.len();
        let saturation = self.config.saturation_categories.max(1);
        let count_term = (Decimal::from(agreeing) / Decimal::from(saturation)).min(Decimal::ONE);

        let (weighted, total_weight) = score.contributions.iter().fold(
            (Decimal::ZERO, Decimal::ZERO),
            |(sum, weights), (category, contribution)| {
                let w = self.config.category_weight(*category);
                (sum + w * contribution, weights + w)
            },
        );
        let magnitude_term = if total_weight.is_zero() {
            Decimal::ZERO
        } else {
            weighted / total_weight
        };

        (self.config.count_weight * count_term + self.config.magnitude_weight * magnitude_term)
            .clamp(Decimal::ZERO, Decimal::ONE)
            .round_dp(6)
    }

    fn evaluate(&mut self, now: Timestamp) -> ConfluenceOutcome {
        let long = self.score(Direction::Long, now);
        let short = self.score(Direction::Short, now);

        let (direction, score) = match (long.observations.is_empty(), short.observations.is_empty())
        {
            (false, false) => {
                let expired = self.expire_all();
                info!(
                    "[CONFLUENCE] {} conflicting directions in window, suppressing ({} candidate(s) expired)",
                    self.instrument_id,
                    expired.len()
                );
                return ConfluenceOutcome::Suppressed {
                    reason: SuppressionReason::Conflict,
                    expired,
                };
            }
            (false, true) => (Direction::Long, long),
            (true, false) => (Direction::Short, short),
            (true, true) => {
                return ConfluenceOutcome::suppressed(SuppressionReason::InsufficientCategories {
                    have: 0,
                    need: self.config.min_agreeing_categories,
                });
            }
        };

        let agreeing = score.contributions.len();
        if agreeing < self.config.min_agreeing_categories {
            return ConfluenceOutcome::suppressed(SuppressionReason::InsufficientCategories {
                have: agreeing,
                need: self.config.min_agreeing_categories,
            });
        }

        let confidence = self.confidence(&score);
        let categories: Vec<SourceCategory> = score.contributions.keys().copied().collect();

        if let Some(candidate) = self.candidates.get_mut(&direction) {
            candidate.confidence = candidate.confidence.max(confidence);
            debug!(
                "[CONFLUENCE] {} {} candidate {} strengthened to {}",
                self.instrument_id, direction, candidate.signal_id, candidate.confidence
            );
            return ConfluenceOutcome::Strengthened {
                signal_id: candidate.signal_id,
                confidence: candidate.confidence,
                observations: score.observations,
                categories,
            };
        }

        let signal = Signal::new(
            self.instrument_id.clone(),
            direction,
            confidence,
            score.observations,
            categories,
            now,
        );
        info!(
            "[CONFLUENCE] {} {} signal {} emitted: {} categories, confidence {}",
            self.instrument_id,
            direction,
            signal.id,
            signal.categories.len(),
            signal.confidence
        );
        self.candidates.insert(
            direction,
            Candidate {
                signal_id: signal.id,
                confidence: signal.confidence,
                created_at: now,
            },
        );
        ConfluenceOutcome::Emitted(signal)
    }
}

/// All instrument windows behind one owner
pub struct ConfluenceEngine {
    config: Arc<ConfluenceConfig>,
    windows: HashMap<InstrumentId, InstrumentWindow>,
}

impl ConfluenceEngine {
    pub fn new(config: ConfluenceConfig) -> Self {
        Self {
            config: Arc::new(config),
            windows: HashMap::new(),
        }
    }

    pub fn ingest(&mut self, observation: Observation, now: Timestamp) -> ConfluenceOutcome {
        let config = &self.config;
        self.windows
            .entry(observation.instrument_id.clone())
            .or_insert_with_key(|id| InstrumentWindow::new(id.clone(), config.clone()))
            .ingest(observation, now)
    }

    pub fn resolve(&mut self, instrument_id: &InstrumentId, signal_id: SignalId) -> bool {
        self.windows
            .get_mut(instrument_id)
            .is_some_and(|w| w.resolve(signal_id))
    }

    pub fn tick(&mut self, now: Timestamp) -> Vec<(InstrumentId, TickOutcome)> {
        self.windows
            .iter_mut()
            .map(|(id, window)| (id.clone(), window.tick(now)))
            .filter(|(_, outcome)| outcome.became_stale || !outcome.expired.is_empty())
            .collect()
    }

    pub fn window(&self, instrument_id: &InstrumentId) -> Option<&InstrumentWindow> {
        self.windows.get(instrument_id)
    }
}
