//! Meridian Order Manager
//!
//! The decision half of the core, between the observation bus and the broker:
//! - **Confluence Engine**: per-instrument observation windows, emits
//!   candidate signals when independent source categories agree
//! - **Signal Registry**: signal lifecycle, terminal statuses never regress
//! - **Risk Gate**: approves, resizes or rejects every candidate once
//! - **Position & Exposure Ledger**: positions, headroom reservations, P&L,
//!   drawdown, per-instrument volatility
//! - **Execution Dispatcher**: idempotent order intents, bounded retry, fill
//!   reconciliation
//!
//! ## Architecture
//!
//! ```text
//! Observations ──► ┌──────────────────────────────────────────────┐
//!                  │              Order Manager                   │
//!                  │  ┌────────────────────────────────────────┐  │
//!                  │  │  Confluence Engine (one window per     │  │
//!                  │  │  instrument, single writer)            │  │
//!                  │  └──────────────────┬─────────────────────┘  │
//!                  │                     │ candidate Signal       │
//!                  │  ┌──────────────────▼─────────────────────┐  │
//!                  │  │  Risk Gate ◄── CircuitState (breaker)  │  │
//!                  │  │            ◄── PortfolioState (ledger) │  │
//!                  │  └──────────────────┬─────────────────────┘  │
//!                  │                     │ RiskDecision           │
//!                  │                     │ + headroom reservation │
//!                  │  ┌──────────────────▼─────────────────────┐  │
//!                  │  │  Execution Dispatcher                  │  │
//!                  │  └──────────────────┬─────────────────────┘  │
//!                  └─────────────────────┼────────────────────────┘
//!                                        │ OrderIntent (idempotency key)
//! Broker ◄───────────────────────────────┘
//!
//! Broker fills ──► Ledger open / close ──► PortfolioState ──► Risk Gate
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use meridian_order_manager::{ConfluenceEngine, ConfluenceOutcome, RiskGate};
//!
//! let mut confluence = ConfluenceEngine::new(ConfluenceConfig::default());
//! if let ConfluenceOutcome::Emitted(signal) = confluence.ingest(observation, now) {
//!     let decision = gate.evaluate(&signal, &ledger, &breaker, now);
//!     if decision.is_approved() {
//!         dispatcher.dispatch_open(&decision).await?;
//!     }
//! }
//! ```

pub mod confluence;
pub mod error;
pub mod events;
pub mod execution;
pub mod position;
pub mod risk;
pub mod signal;
pub mod volatility;

// Re-export main types
pub use confluence::{
    ConfluenceConfig, ConfluenceEngine, ConfluenceOutcome, InstrumentWindow, SuppressionReason,
    TickOutcome,
};
pub use error::{Error, Result};
pub use events::CoreEvent;
pub use execution::{DispatchConfig, DispatchState, ExecutionDispatcher};
pub use position::{
    HeadroomPolicy, LedgerConfig, PerformanceSummary, PortfolioState, PositionLedger, Reservation,
    ReservationRequest,
};
pub use risk::{Assessment, Proposal, RiskGate, RiskGateConfig, RiskInputs};
pub use signal::{SignalRegistry, StatusChange};
pub use volatility::{AtrEstimator, VolatilityBook, VolatilitySnapshot};
