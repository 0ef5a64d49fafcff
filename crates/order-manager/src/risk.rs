//! Risk Gate
//!
//! Decides every candidate signal exactly once: approve, resize or reject.
//! [`RiskGate::assess`] is a pure function of the signal, the portfolio
//! snapshot, the circuit state and the instrument's volatility. The final
//! approval goes through the ledger's atomic check-and-reserve, so the
//! headroom it was sized against cannot be spent twice.
//!
//! ## Policy (in order)
//!
//! 1. Circuit HALTED → reject `circuit_halted`
//! 2. Open position on the instrument → reject `position_exists`
//! 3. Volatility-adjusted size, capped by instrument notional and headroom
//! 4. Size rounds to zero → reject `insufficient_headroom`
//! 5. Stop = entry ∓ volatility × stop multiplier
//! 6. Confidence below threshold → reject `low_confidence`, else approve
//!
//! ## Sizing
//!
//! ```text
//! units   = equity × risk_budget_fraction / (volatility × volatility_multiplier)
//! kelly   = min(kelly_multiplier × (p - (1 - p) / payoff_ratio), max_position_fraction)
//! implied = equity × kelly / price
//! ```
//!
//! The confidence-implied size never scales a position above the
//! volatility-derived size; when it would, the decision is a resize.

use log::{debug, info};
use meridian_core::{CircuitState, Price, Quantity, ReasonCode, RiskDecision, Signal, Timestamp};
use meridian_risk_manager::CircuitBreaker;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::position::{HeadroomPolicy, PortfolioState, PositionLedger, ReservationRequest};
use crate::volatility::{VolatilitySnapshot, initial_stop};

/// Risk gate parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskGateConfig {
    /// Minimum signal confidence for approval
    pub confidence_threshold: Decimal,
    /// Fraction of equity risked per trade
    pub risk_budget_fraction: Decimal,
    pub volatility_multiplier: Decimal,
    /// Stop distance in volatilities
    pub stop_multiplier: Decimal,
    pub max_instrument_notional: Decimal,
    /// Sizes are floored to a multiple of this
    pub lot_size: Quantity,
    pub headroom_policy: HeadroomPolicy,
    /// Volatility as a fraction of price when no ATR is known
    pub fallback_volatility_pct: Decimal,
    /// Expected win/loss ratio for the Kelly estimate
    pub payoff_ratio: Decimal,
    /// Fraction of full Kelly applied
    pub kelly_multiplier: Decimal,
    /// Cap on the Kelly fraction of equity
    pub max_position_fraction: Decimal,
}

impl Default for RiskGateConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: dec!(0.40),
            risk_budget_fraction: dec!(0.02),
            volatility_multiplier: dec!(1),
            stop_multiplier: dec!(2),
            max_instrument_notional: dec!(25000),
            lot_size: dec!(1),
            headroom_policy: HeadroomPolicy::Reject,
            fallback_volatility_pct: dec!(0.025),
            payoff_ratio: dec!(2),
            kelly_multiplier: dec!(0.5),
            max_position_fraction: dec!(0.25),
        }
    }
}

impl RiskGateConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.confidence_threshold < Decimal::ZERO || self.confidence_threshold > Decimal::ONE {
            return Err("risk.confidence_threshold must be in [0, 1]".to_string());
        }
        if self.risk_budget_fraction <= Decimal::ZERO || self.risk_budget_fraction > Decimal::ONE {
            return Err("risk.risk_budget_fraction must be in (0, 1]".to_string());
        }
        if self.volatility_multiplier <= Decimal::ZERO || self.stop_multiplier <= Decimal::ZERO {
            return Err("risk multipliers must be positive".to_string());
        }
        if self.max_instrument_notional <= Decimal::ZERO {
            return Err("risk.max_instrument_notional must be positive".to_string());
        }
        if self.payoff_ratio <= Decimal::ZERO {
            return Err("risk.payoff_ratio must be positive".to_string());
        }
        Ok(())
    }
}

/// A sized approval awaiting its headroom reservation
#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    pub size: Quantity,
    pub entry_price: Price,
    pub stop_loss: Price,
    pub reason: ReasonCode,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Assessment {
    Rejected(ReasonCode),
    Proposed(Proposal),
}

/// Everything the gate reads, captured once per decision
#[derive(Debug, Clone)]
pub struct RiskInputs<'a> {
    pub portfolio: &'a PortfolioState,
    pub circuit: CircuitState,
    pub has_position: bool,
    pub volatility: &'a VolatilitySnapshot,
}

pub struct RiskGate {
    config: RiskGateConfig,
}

impl RiskGate {
    pub fn new(config: RiskGateConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskGateConfig {
        &self.config
    }

    fn floor_to_lot(&self, size: Quantity) -> Quantity {
        if self.config.lot_size <= Decimal::ZERO {
            return size.max(Decimal::ZERO);
        }
        ((size / self.config.lot_size).floor() * self.config.lot_size).max(Decimal::ZERO)
    }

    /// Fraction of equity implied by confidence (fractional Kelly)
    pub fn kelly_fraction(&self, confidence: Decimal) -> Decimal {
        let p = confidence.clamp(Decimal::ZERO, Decimal::ONE);
        let full = p - (Decimal::ONE - p) / self.config.payoff_ratio;
        (full * self.config.kelly_multiplier)
            .max(Decimal::ZERO)
            .min(self.config.max_position_fraction)
    }

    /// Apply the decision policy without touching shared state
    pub fn assess(&self, signal: &Signal, inputs: &RiskInputs<'_>) -> Assessment {
        // 1
        if inputs.circuit == CircuitState::Halted {
            return Assessment::Rejected(ReasonCode::CircuitHalted);
        }
        // 2
        if inputs.has_position {
            return Assessment::Rejected(ReasonCode::PositionExists);
        }

        // 3
        let Some(price) = inputs
            .volatility
            .reference_price
            .filter(|p| *p > Decimal::ZERO)
        else {
            return Assessment::Rejected(ReasonCode::NoReferencePrice);
        };
        let Some(volatility) = inputs
            .volatility
            .volatility_or(self.config.fallback_volatility_pct)
            .filter(|v| *v > Decimal::ZERO)
        else {
            return Assessment::Rejected(ReasonCode::NoReferencePrice);
        };

        let equity = inputs.portfolio.equity.max(Decimal::ZERO);
        let risk_budget = equity * self.config.risk_budget_fraction;
        let mut size =
            self.floor_to_lot(risk_budget / (volatility * self.config.volatility_multiplier));
        let mut reason = ReasonCode::Approved;

        if size * price > self.config.max_instrument_notional {
            size = self.floor_to_lot(self.config.max_instrument_notional / price);
            reason = ReasonCode::ResizedToInstrumentCap;
        }

        let headroom = inputs.portfolio.headroom();
        if size * price > headroom {
            match self.config.headroom_policy {
                HeadroomPolicy::Reject => {
                    debug!(
                        "[RISK] {} sized {} notional exceeds headroom {}",
                        signal.instrument_id,
                        size * price,
                        headroom
                    );
                    return Assessment::Rejected(ReasonCode::InsufficientHeadroom);
                }
                HeadroomPolicy::ClipToHeadroom => {
                    size = self.floor_to_lot(headroom / price);
                    reason = ReasonCode::ResizedToHeadroom;
                }
            }
        }

        // 4
        if size.is_zero() {
            return Assessment::Rejected(ReasonCode::InsufficientHeadroom);
        }

        // 5
        let stop_loss = initial_stop(
            signal.direction,
            price,
            volatility,
            self.config.stop_multiplier,
        );

        // 6
        if signal.confidence < self.config.confidence_threshold {
            return Assessment::Rejected(ReasonCode::LowConfidence);
        }
        let implied = self.floor_to_lot(equity * self.kelly_fraction(signal.confidence) / price);
        if implied > size && reason == ReasonCode::Approved {
            reason = ReasonCode::ResizedToVolatilityCap;
        }

        Assessment::Proposed(Proposal {
            size,
            entry_price: price,
            stop_loss,
            reason,
        })
    }

    /// Decide a signal against live ledger and breaker state
    ///
    /// Approvals hold a ledger reservation when this returns.
    pub fn evaluate(
        &self,
        signal: &Signal,
        ledger: &PositionLedger,
        breaker: &CircuitBreaker,
        now: Timestamp,
    ) -> RiskDecision {
        let portfolio = ledger.snapshot();
        let volatility = ledger.volatility().snapshot(&signal.instrument_id);
        let inputs = RiskInputs {
            portfolio: &portfolio,
            circuit: breaker.state(),
            has_position: ledger.has_open_position(&signal.instrument_id),
            volatility: &volatility,
        };

        let decision = match self.assess(signal, &inputs) {
            Assessment::Rejected(reason) => RiskDecision::reject(signal, reason, now),
            Assessment::Proposed(proposal) => {
                let request = ReservationRequest {
                    signal_id: signal.id,
                    instrument_id: signal.instrument_id.clone(),
                    size: proposal.size,
                    price: proposal.entry_price,
                    lot_size: self.config.lot_size,
                    policy: self.config.headroom_policy,
                };
                match ledger.reserve(request, breaker) {
                    Ok(reservation) => {
                        let reason = if reservation.clipped {
                            ReasonCode::ResizedToHeadroom
                        } else {
                            proposal.reason
                        };
                        RiskDecision::accept(
                            signal,
                            reservation.size,
                            proposal.entry_price,
                            proposal.stop_loss,
                            reason,
                            now,
                        )
                    }
                    Err(reason) => RiskDecision::reject(signal, reason, now),
                }
            }
        };

        info!(
            "[RISK] {} {} {} confidence {}: {:?} size {} ({})",
            signal.id,
            signal.instrument_id,
            signal.direction,
            signal.confidence,
            decision.outcome,
            decision.size,
            decision.reason
        );
        decision
    }

    /// Last look before an approval commits: a halt that landed after the
    /// reservation turns it into a `circuit_halted` rejection and frees the
    /// headroom.
    pub fn confirm(
        &self,
        signal: &Signal,
        decision: RiskDecision,
        ledger: &PositionLedger,
        breaker: &CircuitBreaker,
        now: Timestamp,
    ) -> RiskDecision {
        if !decision.is_approved() || !breaker.is_halted() {
            return decision;
        }
        ledger.release(&signal.id);
        info!(
            "[RISK] {} {} approval withdrawn: circuit halted after reservation",
            signal.id, signal.instrument_id
        );
        RiskDecision::reject(signal, ReasonCode::CircuitHalted, now)
    }
}
