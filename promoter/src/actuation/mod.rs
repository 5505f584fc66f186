//! The engine's moving parts.
//!
//! - [`ResourcePersister`] validates and stores submitted delivery configs
//! - [`EnvironmentPromotionChecker`] approves artifact versions per environment
//! - [`ResourceActuator`] reconciles resources against their desired state
//! - [`CheckScheduler`] drives all of the above on fixed-delay loops

mod actuator;
mod persister;
mod promotion;
mod scheduler;
mod validation;

pub use actuator::{ActuationOutcome, ResourceActuator};
pub use persister::ResourcePersister;
pub use promotion::EnvironmentPromotionChecker;
pub use scheduler::{CheckScheduler, ScheduledAgent};
pub use validation::validate;
