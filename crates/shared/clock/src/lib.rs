//! Meridian Clock Infrastructure
//!
//! Provides time sources for production and tests:
//!
//! - [`SystemClock`]: wall-clock time
//! - [`ManualClock`]: frozen time that only moves when told to, so window
//!   decay, staleness and breaker cooldowns can be tested deterministically
//!
//! ## Usage
//!
//! ```ignore
//! use meridian_clock::{Clock, ManualClock};
//! use chrono::Duration;
//!
//! let clock = ManualClock::new(start);
//! clock.advance(Duration::minutes(5)); // Jump forward
//! assert_eq!(clock.now(), start + Duration::minutes(5));
//! ```

mod manual;
mod system;

pub use manual::ManualClock;
pub use system::SystemClock;

// Re-export the Clock trait for convenience
pub use meridian_ports::Clock;
