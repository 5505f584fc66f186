//! Identifier generation.

use uuid::Uuid;

/// Generates an owner id for lease records, e.g. `scheduler-6f1c…`.
#[must_use]
pub fn generate_owner_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4().simple())
}
