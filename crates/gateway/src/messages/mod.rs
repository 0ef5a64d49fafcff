//! Wire message types for gateway communication
//!
//! These types are the normalized format source collaborators deliver
//! observations in (JSON, one record per line on the command line).

pub mod observation;

pub use observation::ObservationMessage;
