//! Circuit Breaker
//!
//! Process-wide safety state machine. Suspends approvals system-wide when
//! the core's inputs or results look wrong.
//!
//! ```text
//!            warning condition                 hard drawdown / timeout / operator
//!   NORMAL ─────────────────────► DEGRADED ─────────────────────────────────► HALTED
//!     ▲  │                           │                                          │
//!     │  └── hard drawdown / operator ──────────────────────────────────────────┤
//!     │                              │                                          │
//!     └──── clear for cooldown ──────┘                authenticated reset ──────┘
//! ```
//!
//! Warning conditions: stale-instrument fraction, drawdown above the warning
//! threshold, collaborator API error rate. Every transition goes through one
//! mutex, so transitions are serialized, and readers always see the latest
//! state.

use crate::error::BreakerError;
use crate::parameters::BreakerConfig;
use crate::surveillance::BreakerInputs;
use log::{error, info, warn};
use meridian_core::{CircuitCause, CircuitState, CircuitStatus, CircuitTransition, Timestamp};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Credential presented by an operator to reset a halt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorCredential {
    pub operator: String,
    pub token: String,
}

impl OperatorCredential {
    pub fn new(operator: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            operator: operator.into(),
            token: token.into(),
        }
    }
}

/// Result of one evaluation pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluation {
    pub transition: Option<CircuitTransition>,
    /// Drawdown moved above the warning threshold on this pass
    pub drawdown_crossed: Option<Decimal>,
}

struct BreakerInner {
    status: CircuitStatus,
    /// When the current DEGRADED episode began
    degraded_since: Option<Timestamp>,
    /// When all warning conditions were last seen clear, while DEGRADED
    clear_since: Option<Timestamp>,
    /// Latched while drawdown stays above the warning threshold
    drawdown_warned: bool,
}

/// Single authoritative circuit state for the process
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig, now: Timestamp) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                status: CircuitStatus {
                    state: CircuitState::Normal,
                    cause: CircuitCause::Startup,
                    since: now,
                },
                degraded_since: None,
                clear_since: None,
                drawdown_warned: false,
            }),
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Current state, read under the transition lock
    pub fn state(&self) -> CircuitState {
        self.inner.lock().status.state
    }

    pub fn is_halted(&self) -> bool {
        self.state() == CircuitState::Halted
    }

    pub fn status(&self) -> CircuitStatus {
        self.inner.lock().status.clone()
    }

    /// First warning condition present in `inputs`, if any
    fn warning_cause(&self, inputs: &BreakerInputs) -> Option<CircuitCause> {
        if inputs.stale_fraction > Decimal::ZERO
            && inputs.stale_fraction >= self.config.stale_fraction_threshold
        {
            return Some(CircuitCause::DataStaleness {
                stale_fraction: inputs.stale_fraction,
            });
        }
        if inputs.drawdown >= self.config.drawdown_warning {
            return Some(CircuitCause::DrawdownWarning {
                drawdown: inputs.drawdown,
            });
        }
        if let Some(api) = &inputs.worst_api
            && api.error_rate >= self.config.api_error_rate_threshold
        {
            return Some(CircuitCause::ApiErrorRate {
                source: api.source.clone(),
                error_rate: api.error_rate,
            });
        }
        None
    }

    /// Sample the current conditions and move the state machine
    pub fn evaluate(&self, inputs: &BreakerInputs, now: Timestamp) -> Evaluation {
        let mut inner = self.inner.lock();
        let mut evaluation = Evaluation::default();

        if inputs.drawdown >= self.config.drawdown_warning {
            if !inner.drawdown_warned {
                inner.drawdown_warned = true;
                evaluation.drawdown_crossed = Some(inputs.drawdown);
            }
        } else {
            inner.drawdown_warned = false;
        }

        let state = inner.status.state;
        if state == CircuitState::Halted {
            return evaluation;
        }

        if inputs.drawdown >= self.config.drawdown_hard {
            let cause = CircuitCause::DrawdownHard {
                drawdown: inputs.drawdown,
            };
            evaluation.transition = Some(Self::apply(&mut inner, CircuitState::Halted, cause, now));
            return evaluation;
        }

        let warning = self.warning_cause(inputs);
        match state {
            CircuitState::Normal => {
                if let Some(cause) = warning {
                    evaluation.transition =
                        Some(Self::apply(&mut inner, CircuitState::Degraded, cause, now));
                }
            }
            CircuitState::Degraded => {
                if warning.is_some() {
                    inner.clear_since = None;
                } else {
                    let clear_since = *inner.clear_since.get_or_insert(now);
                    if now - clear_since >= self.config.cooldown() {
                        evaluation.transition = Some(Self::apply(
                            &mut inner,
                            CircuitState::Normal,
                            CircuitCause::ConditionsCleared,
                            now,
                        ));
                        return evaluation;
                    }
                }

                let degraded_since = inner.degraded_since.unwrap_or(inner.status.since);
                let degraded_for = now - degraded_since;
                if degraded_for > self.config.halt_timeout() {
                    let cause = CircuitCause::DegradedTimeout {
                        degraded_secs: degraded_for.num_seconds(),
                    };
                    evaluation.transition =
                        Some(Self::apply(&mut inner, CircuitState::Halted, cause, now));
                }
            }
            CircuitState::Halted => {}
        }

        evaluation
    }

    /// Operator halt; takes effect before this call returns
    pub fn halt(
        &self,
        operator: impl Into<String>,
        note: impl Into<String>,
        now: Timestamp,
    ) -> Option<CircuitTransition> {
        let mut inner = self.inner.lock();
        if inner.status.state == CircuitState::Halted {
            return None;
        }
        let cause = CircuitCause::OperatorHalt {
            operator: operator.into(),
            note: note.into(),
        };
        Some(Self::apply(&mut inner, CircuitState::Halted, cause, now))
    }

    /// Explicit, authenticated HALTED -> NORMAL
    pub fn reset(
        &self,
        credential: &OperatorCredential,
        now: Timestamp,
    ) -> Result<CircuitTransition, BreakerError> {
        let mut inner = self.inner.lock();
        if credential.token != self.config.operator_token {
            warn!(
                "[BREAKER] Reset attempt by {} refused: bad credential",
                credential.operator
            );
            return Err(BreakerError::Unauthorized {
                operator: credential.operator.clone(),
            });
        }
        if inner.status.state != CircuitState::Halted {
            return Err(BreakerError::NotHalted(inner.status.state));
        }
        let cause = CircuitCause::OperatorReset {
            operator: credential.operator.clone(),
        };
        Ok(Self::apply(&mut inner, CircuitState::Normal, cause, now))
    }

    fn apply(
        inner: &mut BreakerInner,
        to: CircuitState,
        cause: CircuitCause,
        now: Timestamp,
    ) -> CircuitTransition {
        let from = inner.status.state;
        match to {
            CircuitState::Halted => error!("[BREAKER] {:?} -> HALTED: {}", from, cause),
            CircuitState::Degraded => warn!("[BREAKER] {:?} -> DEGRADED: {}", from, cause),
            CircuitState::Normal => info!("[BREAKER] {:?} -> NORMAL: {}", from, cause),
        }

        inner.degraded_since = match to {
            CircuitState::Degraded => Some(now),
            _ => None,
        };
        inner.clear_since = None;
        inner.status = CircuitStatus {
            state: to,
            cause: cause.clone(),
            since: now,
        };

        CircuitTransition {
            from,
            to,
            cause,
            at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surveillance::ApiHealth;
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn t0() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 3, 1, 14, 30, 0).unwrap()
    }

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(
            BreakerConfig {
                cooldown_ms: 60_000,
                halt_timeout_ms: 600_000,
                operator_token: "s3cret".to_string(),
                ..Default::default()
            },
            t0(),
        )
    }

    fn clear() -> BreakerInputs {
        BreakerInputs::default()
    }

    fn drawdown(d: Decimal) -> BreakerInputs {
        BreakerInputs {
            drawdown: d,
            ..Default::default()
        }
    }

    #[test]
    fn test_degrade_and_recover_after_cooldown() {
        let b = breaker();
        let stale = BreakerInputs {
            stale_fraction: dec!(0.6),
            ..Default::default()
        };

        let t = b.evaluate(&stale, t0()).transition.unwrap();
        assert_eq!((t.from, t.to), (CircuitState::Normal, CircuitState::Degraded));

        // Clear, but not for long enough
        assert!(b.evaluate(&clear(), t0() + Duration::seconds(10)).transition.is_none());
        assert!(b.evaluate(&clear(), t0() + Duration::seconds(60)).transition.is_none());
        // Condition comes back: cooldown restarts
        assert!(b.evaluate(&stale, t0() + Duration::seconds(65)).transition.is_none());
        assert!(b.evaluate(&clear(), t0() + Duration::seconds(70)).transition.is_none());

        let t = b
            .evaluate(&clear(), t0() + Duration::seconds(130))
            .transition
            .unwrap();
        assert_eq!(t.to, CircuitState::Normal);
        assert_eq!(t.cause, CircuitCause::ConditionsCleared);
    }

    #[test]
    fn test_degraded_timeout_halts() {
        let b = breaker();
        let api = BreakerInputs {
            worst_api: Some(ApiHealth {
                source: "broker".to_string(),
                error_rate: dec!(0.8),
                samples: 10,
            }),
            ..Default::default()
        };
        b.evaluate(&api, t0());
        assert_eq!(b.state(), CircuitState::Degraded);

        assert!(b.evaluate(&api, t0() + Duration::minutes(5)).transition.is_none());
        let t = b
            .evaluate(&api, t0() + Duration::minutes(11))
            .transition
            .unwrap();
        assert_eq!(t.to, CircuitState::Halted);
        assert!(matches!(t.cause, CircuitCause::DegradedTimeout { .. }));
    }

    #[test]
    fn test_hard_drawdown_halts_directly() {
        let b = breaker();
        let eval = b.evaluate(&drawdown(dec!(0.09)), t0());
        let t = eval.transition.unwrap();
        assert_eq!((t.from, t.to), (CircuitState::Normal, CircuitState::Halted));
        assert_eq!(eval.drawdown_crossed, Some(dec!(0.09)));
    }

    #[test]
    fn test_halt_never_clears_automatically() {
        let b = breaker();
        b.halt("ops", "manual", t0()).unwrap();
        assert!(b.halt("ops", "again", t0()).is_none());

        for minutes in [1, 10, 100] {
            let eval = b.evaluate(&clear(), t0() + Duration::minutes(minutes));
            assert!(eval.transition.is_none());
        }
        assert!(b.is_halted());
    }

    #[test]
    fn test_reset_requires_credential() {
        let b = breaker();
        assert_eq!(
            b.reset(&OperatorCredential::new("ops", "s3cret"), t0()),
            Err(BreakerError::NotHalted(CircuitState::Normal))
        );

        b.halt("ops", "drill", t0());
        assert_eq!(
            b.reset(&OperatorCredential::new("mallory", "guess"), t0()),
            Err(BreakerError::Unauthorized {
                operator: "mallory".to_string()
            })
        );
        assert!(b.is_halted());

        let t = b
            .reset(&OperatorCredential::new("ops", "s3cret"), t0() + Duration::seconds(1))
            .unwrap();
        assert_eq!(t.to, CircuitState::Normal);
        assert_eq!(b.status().since, t0() + Duration::seconds(1));
    }

    #[test]
    fn test_drawdown_alert_once_per_crossing() {
        let b = breaker();
        assert_eq!(
            b.evaluate(&drawdown(dec!(0.06)), t0()).drawdown_crossed,
            Some(dec!(0.06))
        );
        assert_eq!(b.evaluate(&drawdown(dec!(0.07)), t0()).drawdown_crossed, None);
        b.evaluate(&drawdown(dec!(0.01)), t0());
        assert_eq!(
            b.evaluate(&drawdown(dec!(0.055)), t0()).drawdown_crossed,
            Some(dec!(0.055))
        );
    }
}
