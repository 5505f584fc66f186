//! A clock tests can move by hand.

use crate::utils::{saturating_add, Clock, Timestamp};
use parking_lot::Mutex;
use std::time::Duration;

/// A [`Clock`] that only moves when told to.
#[derive(Debug)]
pub struct MutableClock {
    now: Mutex<Timestamp>,
}

impl MutableClock {
    /// Creates a clock frozen at `now`.
    #[must_use]
    pub fn new(now: Timestamp) -> Self {
        Self { now: Mutex::new(now) }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now = saturating_add(*now, by);
    }

    /// Jumps to `now`.
    pub fn set(&self, now: Timestamp) {
        *self.now.lock() = now;
    }
}

impl Clock for MutableClock {
    fn now(&self) -> Timestamp {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_advance_and_set() {
        let start = Utc.with_ymd_and_hms(2020, 3, 25, 12, 0, 0).unwrap();
        let clock = MutableClock::new(start);
        clock.advance(Duration::from_secs(90));
        assert_eq!(clock.now(), start + chrono::Duration::seconds(90));
        clock.set(start);
        assert_eq!(clock.now(), start);
    }
}
