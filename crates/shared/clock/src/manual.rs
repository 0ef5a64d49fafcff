use chrono::{Duration, Utc};
use meridian_core::Timestamp;
use meridian_ports::Clock;
use parking_lot::RwLock;
use std::sync::Arc;

/// Fixed clock that only advances when explicitly moved
///
/// Shared by handle: every component holding the `Arc` sees the same time.
pub struct ManualClock {
    current_time: RwLock<Timestamp>,
}

impl ManualClock {
    /// Create a new manual clock
    ///
    /// # Arguments
    /// * `initial_time` - Starting time
    pub fn new(initial_time: Timestamp) -> Arc<Self> {
        Arc::new(Self {
            current_time: RwLock::new(initial_time),
        })
    }

    /// Start at the current wall time
    pub fn starting_now() -> Arc<Self> {
        Self::new(Utc::now())
    }

    /// Advance the time by a specified duration
    pub fn advance(&self, duration: Duration) {
        let mut current = self.current_time.write();
        *current += duration;
    }

    /// Explicitly set the time
    ///
    /// Warning: moving backwards breaks monotonicity assumptions downstream.
    pub fn set_time(&self, time: Timestamp) {
        *self.current_time.write() = time;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.current_time.read()
    }

    fn name(&self) -> &str {
        "ManualClock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_until_advanced() {
        let clock = ManualClock::starting_now();

        let time1 = clock.now();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let time2 = clock.now();

        // Time should not advance automatically
        assert_eq!(time1, time2);

        // Advance manually
        clock.advance(Duration::seconds(5));
        let time3 = clock.now();
        assert_eq!(time3 - time1, Duration::seconds(5));
    }

    #[test]
    fn test_shared_handle() {
        let clock = ManualClock::starting_now();
        let as_port: Arc<dyn Clock> = clock.clone();
        let target = clock.now() + Duration::minutes(3);
        clock.set_time(target);
        assert_eq!(as_port.now(), target);
    }
}
