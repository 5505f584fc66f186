//! Testing utilities for the promoter engine.
//!
//! This module provides:
//! - A settable clock
//! - Fixture delivery configs, artifacts and resources
//! - Hand-written handler, veto and constraint mocks

mod clock;
pub mod fixtures;
mod mocks;

pub use clock::MutableClock;
pub use mocks::{MockResourceHandler, ScriptedConstraintEvaluator, StaticVeto};
