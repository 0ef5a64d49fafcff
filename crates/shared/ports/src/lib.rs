//! Meridian Ports
//!
//! Port definitions (traits) for the decision core.
//! These define the boundaries between the core and its collaborators:
//! time, the broker, persistence and alerting.

mod alert;
mod audit;
mod broker;
mod clock;
mod error;

pub use alert::AlertSink;
pub use audit::AuditSink;
pub use broker::Broker;
pub use clock::Clock;
pub use error::{BrokerError, SinkError};
