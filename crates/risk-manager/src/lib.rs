//! Meridian Risk Manager
//!
//! System-level safety for the decision core. Unlike the per-signal risk
//! gate (sizing, headroom, confidence), this handles:
//!
//! - **Circuit Breaker**: the single process-wide NORMAL / DEGRADED / HALTED
//!   state that can suspend approvals everywhere at once
//! - **Data-Quality Surveillance**: instrument freshness and collaborator
//!   error rates feeding the breaker
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Risk Manager                           │
//! │                                                             │
//! │  Observations ───► Surveillance ───► stale fraction         │
//! │  Broker calls ───► Surveillance ───► API error rate         │
//! │  Ledger ─────────────────────────► drawdown                 │
//! │                          │                                  │
//! │                          ▼                                  │
//! │                  Circuit Breaker ◄─── operator halt/reset   │
//! └──────────────────────────┬──────────────────────────────────┘
//!                            │ CircuitState (read synchronously)
//!                            ▼
//!                    Risk Gate / Ledger
//! ```

pub mod breaker;
pub mod error;
pub mod parameters;
pub mod surveillance;

// Re-export main types
pub use breaker::{CircuitBreaker, Evaluation, OperatorCredential};
pub use error::BreakerError;
pub use parameters::{BreakerConfig, SurveillanceConfig};
pub use surveillance::{ApiHealth, BreakerInputs, DataQualityMonitor};
