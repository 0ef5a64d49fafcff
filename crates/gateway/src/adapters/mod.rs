//! Collaborator adapters
//!
//! Concrete implementations of the broker, persistence and alerting ports.

pub mod paper;
pub mod sinks;

pub use paper::{PaperBroker, PaperBrokerConfig};
pub use sinks::{JsonLinesAuditSink, LogAlertSink, MemoryAuditSink, RecordingAlertSink};
