use chrono::Utc;
use meridian_core::Timestamp;
use meridian_ports::Clock;
use parking_lot::Mutex;

/// Wall-clock time that never steps backwards
///
/// Staleness, window decay and breaker cooldowns are all differences of
/// `now()` readings; an NTP correction that moves the host clock back is
/// absorbed by holding the last reading until wall time catches up.
pub struct SystemClock {
    last: Mutex<Option<Timestamp>>,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            last: Mutex::new(None),
        }
    }

    fn advance_to(&self, wall: Timestamp) -> Timestamp {
        let mut last = self.last.lock();
        let now = match *last {
            Some(previous) if previous > wall => previous,
            _ => wall,
        };
        *last = Some(now);
        now
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        self.advance_to(Utc::now())
    }

    fn name(&self) -> &str {
        "system"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_readings_never_decrease() {
        let clock = SystemClock::new();
        let mut previous = clock.now();
        for _ in 0..1_000 {
            let next = clock.now();
            assert!(next >= previous);
            previous = next;
        }
    }

    #[test]
    fn test_backwards_step_is_held() {
        let clock = SystemClock::new();
        let t0 = Utc::now();
        assert_eq!(clock.advance_to(t0), t0);

        // Host clock corrected back by two seconds
        assert_eq!(clock.advance_to(t0 - Duration::seconds(2)), t0);

        let later = t0 + Duration::milliseconds(5);
        assert_eq!(clock.advance_to(later), later);
    }
}
