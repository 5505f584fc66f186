//! Timestamp utilities.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Represents a timestamp that can be serialized/deserialized.
pub type Timestamp = DateTime<Utc>;

/// Converts a std duration to a chrono duration, saturating on overflow.
#[must_use]
pub fn to_chrono_duration(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

/// `at - duration`, clamped to the earliest representable instant.
#[must_use]
pub fn saturating_sub(at: Timestamp, duration: Duration) -> Timestamp {
    at.checked_sub_signed(to_chrono_duration(duration))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// `at + duration`, clamped to the latest representable instant.
#[must_use]
pub fn saturating_add(at: Timestamp, duration: Duration) -> Timestamp {
    at.checked_add_signed(to_chrono_duration(duration))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
