//! Meridian Gateway
//!
//! Gateway layer for the decision core. Provides:
//! - Transport abstraction (tokio channels, with traits for future transports)
//! - The Observation Bus carrying normalized observations into the core
//! - Wire message types for inbound observations
//! - Collaborator adapters (paper broker, audit and alert sinks)
//!
//! ## Architecture
//!
//! ```text
//! Source collaborators (options flow, filings, news, social, economic, price)
//!         │ ObservationMessage (JSON)
//!    ┌────▼──────────┐
//!    │ ObservationBus│  bounded mpsc, many writers
//!    └────┬──────────┘
//!         │ Observation
//!    ┌────▼────┐         ┌──────────────┐
//!    │  Core   │────────►│ Broker port  │──► PaperBroker / live adapter
//!    │         │────────►│ Audit port   │──► JsonLines / Memory
//!    └─────────┘────────►│ Alert port   │──► Log / Recording
//!                        └──────────────┘
//! ```
//!
//! ## Transport
//!
//! Uses tokio channels for single-process operation.
//! The `Publisher`/`Subscriber` traits allow plugging in other
//! transports (NATS, Aeron, etc.) when needed.

pub mod adapters;
pub mod bus;
pub mod error;
pub mod messages;
pub mod transport;

// Re-export commonly used types
pub use adapters::{
    JsonLinesAuditSink, LogAlertSink, MemoryAuditSink, PaperBroker, PaperBrokerConfig,
    RecordingAlertSink,
};
pub use bus::{ObservationBus, ObservationStream};
pub use error::{GatewayError, TransportError};
pub use messages::ObservationMessage;
pub use transport::{
    Publisher, Subscriber,
    channel::{ChannelPublisher, ChannelSubscriber},
};
