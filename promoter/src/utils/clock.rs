//! Injectable time source.

use super::Timestamp;
use chrono::Utc;

/// A source of the current time.
///
/// Components read time through this trait so that lease expiry, judgement
/// timeouts and recheck windows can be driven deterministically in tests.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Returns the current instant.
    fn now(&self) -> Timestamp;
}

/// The wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}
