//! Position & Exposure Ledger
//!
//! Authoritative view of open positions, approval reservations and the
//! portfolio state derived from them.
//!
//! ## Exposure
//!
//! ```text
//! headroom = exposure_ceiling - open_notional - reserved_notional
//! ```
//!
//! Approvals claim headroom through [`PositionLedger::reserve`], which checks
//! and reserves under one lock, so two concurrent approvals can never both
//! spend the same headroom. A fill converts the reservation into an open
//! position charged at the reserved notional; a failed dispatch releases it.
//!
//! ## P&L
//!
//! ```text
//! realized   = (exit - entry) × signed size      (on close)
//! equity     = starting_equity + Σ realized
//! drawdown   = (peak_equity - equity) / peak_equity
//! unrealized = Σ (mark - entry) × signed size    (incremental, on mark)
//! ```

use log::{debug, error, info, warn};
use meridian_core::{
    Direction, Fill, InstrumentId, Position, PositionId, PositionStatus, Price, PriceBar,
    Quantity, ReasonCode, RiskDecision, SignalId, Timestamp,
};
use meridian_risk_manager::CircuitBreaker;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::{Error, Result};
use crate::volatility::{VolatilityBook, trail_stop};

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub starting_equity: Decimal,
    /// Portfolio-wide notional ceiling
    pub exposure_ceiling: Decimal,
    /// ATR lookback
    pub atr_period: u32,
    /// Ratchet stops behind favourable moves
    pub trailing_stop: bool,
    /// Trailing distance in ATRs
    pub trailing_multiplier: Decimal,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            starting_equity: dec!(100000),
            exposure_ceiling: dec!(50000),
            atr_period: 14,
            trailing_stop: true,
            trailing_multiplier: dec!(2),
        }
    }
}

impl LedgerConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.starting_equity <= Decimal::ZERO {
            return Err("ledger.starting_equity must be positive".to_string());
        }
        if self.exposure_ceiling < Decimal::ZERO {
            return Err("ledger.exposure_ceiling must be non-negative".to_string());
        }
        if self.atr_period == 0 {
            return Err("ledger.atr_period must be at least 1".to_string());
        }
        Ok(())
    }
}

/// How the ledger treats a request larger than the remaining headroom
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeadroomPolicy {
    /// Refuse with `insufficient_headroom`
    #[default]
    Reject,
    /// Shrink to what fits
    ClipToHeadroom,
}

/// Derived portfolio view, updated on every ledger mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioState {
    pub starting_equity: Decimal,
    pub equity: Decimal,
    pub peak_equity: Decimal,
    pub drawdown: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub open_notional: Decimal,
    pub reserved_notional: Decimal,
    pub exposure_ceiling: Decimal,
    pub open_positions: usize,
}

impl PortfolioState {
    fn new(config: &LedgerConfig) -> Self {
        Self {
            starting_equity: config.starting_equity,
            equity: config.starting_equity,
            peak_equity: config.starting_equity,
            drawdown: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            open_notional: Decimal::ZERO,
            reserved_notional: Decimal::ZERO,
            exposure_ceiling: config.exposure_ceiling,
            open_positions: 0,
        }
    }

    /// Notional still available to new approvals
    pub fn headroom(&self) -> Decimal {
        (self.exposure_ceiling - self.open_notional - self.reserved_notional).max(Decimal::ZERO)
    }

    /// Open plus reserved notional
    pub fn committed_notional(&self) -> Decimal {
        self.open_notional + self.reserved_notional
    }
}

/// Request to claim headroom for an approval
#[derive(Debug, Clone)]
pub struct ReservationRequest {
    pub signal_id: SignalId,
    pub instrument_id: InstrumentId,
    pub size: Quantity,
    pub price: Price,
    pub lot_size: Quantity,
    pub policy: HeadroomPolicy,
}

/// Headroom held for an approved signal until it fills or fails
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub signal_id: SignalId,
    pub instrument_id: InstrumentId,
    pub size: Quantity,
    pub price: Price,
    pub notional: Decimal,
    /// Smaller than requested because of the headroom policy
    pub clipped: bool,
}

/// Statistics over closed positions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: Decimal,
    pub gross_profit: Decimal,
    pub gross_loss: Decimal,
    /// gross profit / gross loss, `None` without losing trades
    pub profit_factor: Option<Decimal>,
    pub net_pnl: Decimal,
    pub max_drawdown: Decimal,
}

struct LedgerState {
    portfolio: PortfolioState,
    positions: HashMap<PositionId, Position>,
    open_by_instrument: HashMap<InstrumentId, PositionId>,
    /// Notional each open position is charged against the ceiling
    exposure: HashMap<PositionId, Decimal>,
    /// Unrealized P&L at the last mark, per open position
    marks: HashMap<PositionId, Decimal>,
    reservations: HashMap<SignalId, Reservation>,
    /// Open positions with a stop-triggered close under way
    closing: HashSet<PositionId>,
    closed: Vec<Position>,
    max_drawdown: Decimal,
}

impl LedgerState {
    fn instrument_busy(&self, instrument_id: &InstrumentId) -> bool {
        self.open_by_instrument.contains_key(instrument_id)
            || self
                .reservations
                .values()
                .any(|r| &r.instrument_id == instrument_id)
    }
}

fn floor_to_lot(size: Quantity, lot_size: Quantity) -> Quantity {
    if lot_size <= Decimal::ZERO {
        return size.max(Decimal::ZERO);
    }
    ((size / lot_size).floor() * lot_size).max(Decimal::ZERO)
}

/// The position ledger
///
/// All mutations take one mutex; readers get cloned snapshots.
pub struct PositionLedger {
    config: LedgerConfig,
    state: Mutex<LedgerState>,
    volatility: VolatilityBook,
}

impl PositionLedger {
    pub fn new(config: LedgerConfig) -> Self {
        let volatility = VolatilityBook::new(config.atr_period);
        Self {
            state: Mutex::new(LedgerState {
                portfolio: PortfolioState::new(&config),
                positions: HashMap::new(),
                open_by_instrument: HashMap::new(),
                exposure: HashMap::new(),
                marks: HashMap::new(),
                reservations: HashMap::new(),
                closing: HashSet::new(),
                closed: Vec::new(),
                max_drawdown: Decimal::ZERO,
            }),
            volatility,
            config,
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn volatility(&self) -> &VolatilityBook {
        &self.volatility
    }

    /// Consistent copy of the portfolio state
    pub fn snapshot(&self) -> PortfolioState {
        self.state.lock().portfolio.clone()
    }

    pub fn has_open_position(&self, instrument_id: &InstrumentId) -> bool {
        self.state.lock().open_by_instrument.contains_key(instrument_id)
    }

    pub fn open_position(&self, instrument_id: &InstrumentId) -> Option<Position> {
        let state = self.state.lock();
        state
            .open_by_instrument
            .get(instrument_id)
            .and_then(|id| state.positions.get(id))
            .cloned()
    }

    pub fn position(&self, position_id: &PositionId) -> Option<Position> {
        self.state.lock().positions.get(position_id).cloned()
    }

    pub fn open_positions(&self) -> Vec<Position> {
        let state = self.state.lock();
        state
            .open_by_instrument
            .values()
            .filter_map(|id| state.positions.get(id))
            .cloned()
            .collect()
    }

    pub fn closed_positions(&self) -> Vec<Position> {
        self.state.lock().closed.clone()
    }

    pub fn position_for_signal(&self, signal_id: &SignalId) -> Option<Position> {
        self.state
            .lock()
            .positions
            .values()
            .find(|p| &p.signal_id == signal_id)
            .cloned()
    }

    pub fn reservation(&self, signal_id: &SignalId) -> Option<Reservation> {
        self.state.lock().reservations.get(signal_id).cloned()
    }

    /// Atomically check and claim exposure headroom for an approval
    ///
    /// Re-checks the circuit, existing positions or reservations on the
    /// instrument, and the remaining headroom, all under the ledger lock.
    pub fn reserve(
        &self,
        request: ReservationRequest,
        breaker: &CircuitBreaker,
    ) -> std::result::Result<Reservation, ReasonCode> {
        let mut state = self.state.lock();

        if breaker.is_halted() {
            return Err(ReasonCode::CircuitHalted);
        }
        if state.reservations.contains_key(&request.signal_id)
            || state.instrument_busy(&request.instrument_id)
        {
            return Err(ReasonCode::PositionExists);
        }

        let headroom = state.portfolio.headroom();
        let mut size = floor_to_lot(request.size, request.lot_size);
        let mut clipped = false;
        if size * request.price > headroom {
            match request.policy {
                HeadroomPolicy::Reject => {
                    debug!(
                        "[LEDGER] {} needs {} notional, headroom {}",
                        request.instrument_id,
                        size * request.price,
                        headroom
                    );
                    return Err(ReasonCode::InsufficientHeadroom);
                }
                HeadroomPolicy::ClipToHeadroom => {
                    size = floor_to_lot(headroom / request.price, request.lot_size);
                    clipped = true;
                }
            }
        }
        if size.is_zero() {
            return Err(ReasonCode::InsufficientHeadroom);
        }

        let reservation = Reservation {
            signal_id: request.signal_id,
            instrument_id: request.instrument_id,
            size,
            price: request.price,
            notional: size * request.price,
            clipped,
        };
        state.portfolio.reserved_notional += reservation.notional;
        state
            .reservations
            .insert(reservation.signal_id, reservation.clone());
        debug!(
            "[LEDGER] Reserved {} for {} ({} left)",
            reservation.notional,
            reservation.instrument_id,
            state.portfolio.headroom()
        );
        Ok(reservation)
    }

    /// Return a reservation's headroom
    pub fn release(&self, signal_id: &SignalId) -> Option<Reservation> {
        let mut state = self.state.lock();
        let reservation = state.reservations.remove(signal_id)?;
        state.portfolio.reserved_notional -= reservation.notional;
        debug!(
            "[LEDGER] Released {} reserved for {}",
            reservation.notional, reservation.instrument_id
        );
        Some(reservation)
    }

    /// Open a position from an approved decision and its fill
    pub fn open(&self, decision: &RiskDecision, fill: &Fill) -> Result<Position> {
        let Some(stop_loss) = decision.stop_loss.filter(|_| decision.is_approved()) else {
            return Err(Error::RiskRejected {
                signal_id: decision.signal_id,
                reason: decision.reason,
            });
        };

        let mut state = self.state.lock();
        if state.open_by_instrument.contains_key(&decision.instrument_id) {
            error!(
                "[LEDGER] INVARIANT VIOLATION: open position already exists for {} (signal {})",
                decision.instrument_id, decision.signal_id
            );
            return Err(Error::DuplicatePosition(decision.instrument_id.clone()));
        }

        let position = Position::open(
            decision.instrument_id.clone(),
            decision.direction,
            fill.size,
            fill.price,
            stop_loss,
            decision.signal_id,
            fill.order_id,
            fill.timestamp,
        );

        let charged = match state.reservations.remove(&decision.signal_id) {
            Some(reservation) => {
                state.portfolio.reserved_notional -= reservation.notional;
                reservation.notional
            }
            None => position.notional(),
        };
        state.portfolio.open_notional += charged;
        state.portfolio.open_positions += 1;
        state.exposure.insert(position.id, charged);
        state.marks.insert(position.id, Decimal::ZERO);
        state
            .open_by_instrument
            .insert(position.instrument_id.clone(), position.id);
        state.positions.insert(position.id, position.clone());

        info!(
            "[LEDGER] Opened {} {} {} @ {} stop {} (exposure {}/{})",
            position.instrument_id,
            position.direction(),
            position.size.abs(),
            position.entry_price,
            position.stop_loss,
            state.portfolio.open_notional,
            state.portfolio.exposure_ceiling
        );
        Ok(position)
    }

    /// Close an open position at `exit_price`
    pub fn close(
        &self,
        position_id: &PositionId,
        exit_price: Price,
        at: Timestamp,
    ) -> Result<Position> {
        let mut state = self.state.lock();
        let is_open = state
            .positions
            .get(position_id)
            .is_some_and(|p| p.is_open());
        if !is_open {
            error!(
                "[LEDGER] INVARIANT VIOLATION: close of unknown or closed position {}",
                position_id
            );
            return Err(Error::UnknownPosition(*position_id));
        }

        let charged = state.exposure.remove(position_id).unwrap_or(Decimal::ZERO);
        let last_mark = state.marks.remove(position_id).unwrap_or(Decimal::ZERO);
        state.closing.remove(position_id);

        let Some(position) = state.positions.get_mut(position_id) else {
            return Err(Error::UnknownPosition(*position_id));
        };
        let pnl = position.pnl_at(exit_price);
        position.status = PositionStatus::Closed;
        position.closed_at = Some(at);
        position.exit_price = Some(exit_price);
        position.realized_pnl = Some(pnl);
        let closed = position.clone();

        state.open_by_instrument.remove(&closed.instrument_id);
        state.closed.push(closed.clone());

        let portfolio = &mut state.portfolio;
        portfolio.open_notional -= charged;
        portfolio.open_positions = portfolio.open_positions.saturating_sub(1);
        portfolio.unrealized_pnl -= last_mark;
        portfolio.realized_pnl += pnl;
        portfolio.equity = portfolio.starting_equity + portfolio.realized_pnl;
        portfolio.peak_equity = portfolio.peak_equity.max(portfolio.equity);
        portfolio.drawdown = if portfolio.peak_equity > Decimal::ZERO {
            ((portfolio.peak_equity - portfolio.equity) / portfolio.peak_equity)
                .max(Decimal::ZERO)
        } else {
            Decimal::ZERO
        };
        let drawdown = portfolio.drawdown;
        let equity = portfolio.equity;
        state.max_drawdown = state.max_drawdown.max(drawdown);

        info!(
            "[LEDGER] Closed {} @ {} pnl {} (equity {}, drawdown {})",
            closed.instrument_id, exit_price, pnl, equity, drawdown
        );
        Ok(closed)
    }

    /// Revalue the open position on `instrument_id` at `price`
    ///
    /// Updates unrealized P&L incrementally and ratchets a trailing stop.
    /// Returns the position the first time its stop is hit.
    pub fn mark(&self, instrument_id: &InstrumentId, price: Price) -> Option<Position> {
        let atr = self.volatility.atr(instrument_id);
        let mut state = self.state.lock();
        let position_id = *state.open_by_instrument.get(instrument_id)?;

        let position = state.positions.get_mut(&position_id)?;
        let unrealized = position.pnl_at(price);
        if self.config.trailing_stop
            && let Some(atr) = atr
        {
            let direction: Direction = position.direction();
            position.stop_loss = trail_stop(
                direction,
                position.stop_loss,
                price,
                atr,
                self.config.trailing_multiplier,
            );
        }
        let triggered = position.stop_triggered(price).then(|| position.clone());

        let previous = state.marks.insert(position_id, unrealized).unwrap_or(Decimal::ZERO);
        state.portfolio.unrealized_pnl += unrealized - previous;

        let triggered = triggered?;
        if !state.closing.insert(position_id) {
            return None;
        }
        warn!(
            "[LEDGER] Stop hit on {} at {} (stop {})",
            instrument_id, price, triggered.stop_loss
        );
        Some(triggered)
    }

    /// Fold a price bar into volatility and revalue at its close
    pub fn observe_bar(&self, instrument_id: &InstrumentId, bar: &PriceBar) -> Option<Position> {
        self.volatility.observe_bar(instrument_id, bar);
        self.mark(instrument_id, bar.close)
    }

    /// Let a stop re-trigger after its close failed to dispatch
    pub fn abandon_close(&self, position_id: &PositionId) {
        self.state.lock().closing.remove(position_id);
    }

    pub fn performance(&self) -> PerformanceSummary {
        let state = self.state.lock();
        let mut summary = PerformanceSummary {
            max_drawdown: state.max_drawdown,
            ..Default::default()
        };
        for pnl in state.closed.iter().filter_map(|p| p.realized_pnl) {
            summary.trades += 1;
            summary.net_pnl += pnl;
            if pnl > Decimal::ZERO {
                summary.wins += 1;
                summary.gross_profit += pnl;
            } else if pnl < Decimal::ZERO {
                summary.losses += 1;
                summary.gross_loss += pnl.abs();
            }
        }
        if summary.trades > 0 {
            summary.win_rate = Decimal::from(summary.wins) / Decimal::from(summary.trades);
        }
        if summary.gross_loss > Decimal::ZERO {
            summary.profit_factor = Some(summary.gross_profit / summary.gross_loss);
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use meridian_core::{Signal, SourceCategory};
    use meridian_risk_manager::BreakerConfig;
    use uuid::Uuid;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(BreakerConfig::default(), Utc::now())
    }

    fn ledger(ceiling: Decimal) -> PositionLedger {
        PositionLedger::new(LedgerConfig {
            exposure_ceiling: ceiling,
            trailing_stop: false,
            ..Default::default()
        })
    }

    fn approved(direction: Direction, size: Decimal, entry: Price, stop: Price) -> RiskDecision {
        let signal = Signal::new(
            "XYZ",
            direction,
            dec!(0.7),
            vec![Uuid::new_v4()],
            vec![SourceCategory::News],
            Utc::now(),
        );
        RiskDecision::accept(&signal, size, entry, stop, ReasonCode::Approved, Utc::now())
    }

    fn fill_for(decision: &RiskDecision, price: Price) -> Fill {
        Fill {
            order_id: Uuid::new_v4(),
            key: meridian_core::IdempotencyKey::derive(
                decision.signal_id,
                meridian_core::OrderLeg::Open,
            ),
            instrument_id: decision.instrument_id.clone(),
            price,
            size: decision.size,
            timestamp: Utc::now(),
        }
    }

    fn request(signal_id: SignalId, instrument: &str, size: Decimal) -> ReservationRequest {
        ReservationRequest {
            signal_id,
            instrument_id: InstrumentId::new(instrument),
            size,
            price: dec!(10),
            lot_size: dec!(1),
            policy: HeadroomPolicy::Reject,
        }
    }

    #[test]
    fn test_reserve_rejects_over_headroom() {
        let ledger = ledger(dec!(10000));
        let breaker = breaker();

        let result = ledger.reserve(request(Uuid::new_v4(), "XYZ", dec!(1200)), &breaker);
        assert_eq!(result, Err(ReasonCode::InsufficientHeadroom));
        assert_eq!(ledger.snapshot().reserved_notional, Decimal::ZERO);
    }

    #[test]
    fn test_reserve_clips_when_configured() {
        let ledger = ledger(dec!(10000));
        let mut req = request(Uuid::new_v4(), "XYZ", dec!(1200));
        req.policy = HeadroomPolicy::ClipToHeadroom;

        let reservation = ledger.reserve(req, &breaker()).unwrap();
        assert!(reservation.clipped);
        assert_eq!(reservation.size, dec!(1000));
        assert_eq!(ledger.snapshot().headroom(), Decimal::ZERO);
    }

    #[test]
    fn test_reserve_one_per_instrument_and_release() {
        let ledger = ledger(dec!(10000));
        let breaker = breaker();
        let first = Uuid::new_v4();

        ledger.reserve(request(first, "XYZ", dec!(100)), &breaker).unwrap();
        assert_eq!(
            ledger.reserve(request(Uuid::new_v4(), "XYZ", dec!(100)), &breaker),
            Err(ReasonCode::PositionExists)
        );
        assert!(ledger.reserve(request(Uuid::new_v4(), "ABC", dec!(100)), &breaker).is_ok());

        ledger.release(&first).unwrap();
        assert_eq!(ledger.snapshot().reserved_notional, dec!(1000));
    }

    #[test]
    fn test_reserve_refused_while_halted() {
        let ledger = ledger(dec!(10000));
        let breaker = breaker();
        breaker.halt("ops", "test", Utc::now());
        assert_eq!(
            ledger.reserve(request(Uuid::new_v4(), "XYZ", dec!(1)), &breaker),
            Err(ReasonCode::CircuitHalted)
        );
    }

    #[test]
    fn test_duplicate_position_refused() {
        let ledger = ledger(dec!(100000));
        let first = approved(Direction::Long, dec!(10), dec!(100), dec!(95));
        ledger.open(&first, &fill_for(&first, dec!(100))).unwrap();

        let second = approved(Direction::Long, dec!(5), dec!(100), dec!(95));
        assert_eq!(
            ledger.open(&second, &fill_for(&second, dec!(101))),
            Err(Error::DuplicatePosition(InstrumentId::new("XYZ")))
        );
        assert_eq!(ledger.snapshot().open_positions, 1);
    }

    #[test]
    fn test_unknown_position_refused() {
        let ledger = ledger(dec!(100000));
        let id = Uuid::new_v4();
        assert_eq!(
            ledger.close(&id, dec!(1), Utc::now()),
            Err(Error::UnknownPosition(id))
        );
    }

    #[test]
    fn test_short_round_trip_pnl_and_drawdown() {
        let ledger = ledger(dec!(100000));
        let decision = approved(Direction::Short, dec!(10), dec!(100), dec!(105));
        let position = ledger.open(&decision, &fill_for(&decision, dec!(100))).unwrap();
        assert_eq!(position.size, dec!(-10));
        assert_eq!(ledger.snapshot().open_notional, dec!(1000));

        // Short loses when price rises
        let closed = ledger.close(&position.id, dec!(104), Utc::now()).unwrap();
        assert_eq!(closed.realized_pnl, Some(dec!(-40)));

        let state = ledger.snapshot();
        assert_eq!(state.equity, dec!(99960));
        assert_eq!(state.peak_equity, dec!(100000));
        assert_eq!(state.drawdown, dec!(0.0004));
        assert_eq!(state.open_notional, Decimal::ZERO);
        assert_eq!(state.open_positions, 0);

        // Closing twice is an invariant violation
        assert!(matches!(
            ledger.close(&position.id, dec!(90), Utc::now()),
            Err(Error::UnknownPosition(_))
        ));
    }

    #[test]
    fn test_fill_consumes_reservation() {
        let ledger = ledger(dec!(10000));
        let decision = approved(Direction::Long, dec!(100), dec!(10), dec!(9));
        ledger
            .reserve(
                ReservationRequest {
                    signal_id: decision.signal_id,
                    instrument_id: decision.instrument_id.clone(),
                    size: dec!(100),
                    price: dec!(10),
                    lot_size: dec!(1),
                    policy: HeadroomPolicy::Reject,
                },
                &breaker(),
            )
            .unwrap();

        // Slippage does not push exposure past what was reserved
        ledger.open(&decision, &fill_for(&decision, dec!(10.05))).unwrap();
        let state = ledger.snapshot();
        assert_eq!(state.reserved_notional, Decimal::ZERO);
        assert_eq!(state.open_notional, dec!(1000));
    }

    #[test]
    fn test_mark_is_incremental_and_stop_fires_once() {
        let ledger = ledger(dec!(100000));
        let decision = approved(Direction::Long, dec!(10), dec!(100), dec!(95));
        let position = ledger.open(&decision, &fill_for(&decision, dec!(100))).unwrap();
        let id = InstrumentId::new("XYZ");

        assert!(ledger.mark(&id, dec!(103)).is_none());
        assert_eq!(ledger.snapshot().unrealized_pnl, dec!(30));
        assert!(ledger.mark(&id, dec!(101)).is_none());
        assert_eq!(ledger.snapshot().unrealized_pnl, dec!(10));

        let hit = ledger.mark(&id, dec!(94)).unwrap();
        assert_eq!(hit.id, position.id);
        assert!(ledger.mark(&id, dec!(93)).is_none());

        ledger.close(&position.id, dec!(93), Utc::now()).unwrap();
        assert_eq!(ledger.snapshot().unrealized_pnl, Decimal::ZERO);
    }

    #[test]
    fn test_trailing_stop_ratchets() {
        let ledger = PositionLedger::new(LedgerConfig::default());
        let id = InstrumentId::new("XYZ");
        ledger.volatility().set_atr(&id, dec!(2));

        let decision = approved(Direction::Long, dec!(10), dec!(100), dec!(95));
        let position = ledger.open(&decision, &fill_for(&decision, dec!(100))).unwrap();

        ledger.mark(&id, dec!(110));
        assert_eq!(ledger.position(&position.id).unwrap().stop_loss, dec!(106));
        ledger.mark(&id, dec!(107));
        assert_eq!(ledger.position(&position.id).unwrap().stop_loss, dec!(106));
        assert!(ledger.mark(&id, dec!(105.5)).is_some());
    }

    #[test]
    fn test_performance_summary() {
        let ledger = ledger(dec!(100000));
        for (exit, instrument) in [(dec!(110), "AAA"), (dec!(95), "BBB"), (dec!(120), "CCC")] {
            let signal = Signal::new(
                instrument,
                Direction::Long,
                dec!(0.7),
                vec![Uuid::new_v4()],
                vec![SourceCategory::News],
                Utc::now(),
            );
            let decision = RiskDecision::accept(
                &signal,
                dec!(1),
                dec!(100),
                dec!(90),
                ReasonCode::Approved,
                Utc::now(),
            );
            let position = ledger.open(&decision, &fill_for(&decision, dec!(100))).unwrap();
            ledger.close(&position.id, exit, Utc::now()).unwrap();
        }

        let summary = ledger.performance();
        assert_eq!(summary.trades, 3);
        assert_eq!(summary.wins, 2);
        assert_eq!(summary.gross_profit, dec!(30));
        assert_eq!(summary.gross_loss, dec!(5));
        assert_eq!(summary.profit_factor, Some(dec!(6)));
        assert_eq!(summary.net_pnl, dec!(25));
        assert!(summary.max_drawdown > Decimal::ZERO);
    }
}
