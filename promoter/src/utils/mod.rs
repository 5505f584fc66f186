//! Small shared helpers: timestamps, clocks and identifiers.

pub mod clock;
mod ids;
pub mod timestamps;

pub use clock::{Clock, SystemClock};
pub use ids::generate_owner_id;
pub use timestamps::{saturating_add, saturating_sub, to_chrono_duration, Timestamp};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_ids_are_unique() {
        assert_ne!(generate_owner_id("scheduler"), generate_owner_id("scheduler"));
        assert!(generate_owner_id("scheduler").starts_with("scheduler-"));
    }
}
