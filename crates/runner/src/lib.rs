//! Meridian Runner - Decision Core Orchestration
//!
//! Runs the signal aggregation and risk gating core as a set of tokio tasks:
//!
//! - **Config**: one JSON document for every component, defaults throughout
//! - **Audit Trail**: write-behind persistence that never blocks a decision
//! - **Pipeline**: router, per-instrument workers, decision tasks, ticker
//!
//! ## Architecture
//!
//! ```text
//!   Source collaborators
//!   (price, news, filings, ...)
//!            │ ObservationMessage
//!            ▼
//!   ┌─────────────────┐
//!   │ ObservationBus  │ bounded, many writers
//!   └────────┬────────┘
//!            ▼
//! ┌──────────────────────────────────────────────────────┐
//! │                    DecisionCore                      │
//! │                                                      │
//! │  router ──► instrument workers ──► decision tasks    │
//! │                 (confluence)        (risk gate)      │
//! │                                          │           │
//! │  ticker ──► CircuitBreaker               ▼           │
//! │       ▲                         ExecutionDispatcher  │
//! │       └── DataQualityMonitor ◄─────────┤             │
//! └────────────────────────────────────────┼─────────────┘
//!                                          ▼
//!                 Broker        AuditSink        AlertSink
//! ```

pub mod audit;
pub mod config;
pub mod error;
pub mod pipeline;

// Re-export main types
pub use audit::{AuditStats, AuditTrail, AuditWriter};
pub use config::{AuditConfig, ConfigError, CoreConfig, PipelineConfig};
pub use error::{PipelineError, Result};
pub use pipeline::{DecisionCore, ShutdownReport};
