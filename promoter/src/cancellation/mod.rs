//! Cooperative cancellation and supervised task groups.
//!
//! This module provides:
//! - CancellationToken for stopping long-running loops
//! - SupervisedTaskGroup for running one batch of checks with per-task deadlines

mod task_group;
mod token;

pub use task_group::{SupervisedTaskGroup, TaskOutcome, TaskReport};
pub use token::CancellationToken;
