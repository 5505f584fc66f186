//! # Promoter
//!
//! A continuous-delivery engine that promotes artifact versions through the
//! environments of a delivery config and keeps managed resources in line
//! with their declared desired state.
//!
//! The engine is made of:
//!
//! - **Artifact store**: registered artifacts, their versions and the
//!   promotion state machine per environment
//! - **Constraint runner**: depends-on, manual-judgement and artifact-type
//!   gates deciding which version an environment may receive
//! - **Resource actuator**: desired-vs-current reconciliation guarded by a
//!   veto chain
//! - **Check scheduler**: staleness-based batches, each item under its own
//!   deadline
//! - **Persister**: validated, all-or-nothing delivery config upserts
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use promoter::prelude::*;
//!
//! let clock = Arc::new(SystemClock);
//! let repositories = Repositories::in_memory(clock.clone());
//! let events: Arc<dyn EventSink> = Arc::new(LoggingEventSink::default());
//!
//! let persister = ResourcePersister::new(repositories.clone(), handlers.clone(), events.clone());
//! persister.upsert(&submitted).await?;
//!
//! let scheduler = CheckScheduler::new(repositories, actuator, promotion, verifications, config, events);
//! scheduler.start();
//! scheduler.run(&shutdown).await;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod actuation;
pub mod artifacts;
pub mod cancellation;
pub mod config;
pub mod constraints;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod persistence;
pub mod resources;
pub mod testing;
pub mod utils;
pub mod verification;
pub mod veto;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::actuation::{
        ActuationOutcome, CheckScheduler, EnvironmentPromotionChecker, ResourceActuator,
        ResourcePersister, ScheduledAgent,
    };
    pub use crate::artifacts::{ArtifactHandler, ArtifactSupplier, VersionRefresher};
    pub use crate::cancellation::{CancellationToken, SupervisedTaskGroup};
    pub use crate::config::EngineConfig;
    pub use crate::constraints::{
        ArtifactTypeConstraintEvaluator, ConstraintEvaluator, DependsOnConstraintEvaluator,
        EnvironmentConstraintRunner, ManualJudgementConstraintEvaluator,
    };
    pub use crate::core::{
        ArtifactType, DeliveryArtifact, DeliveryConfig, DeliveryEvent, Environment,
        PromotionStatus, PublishedArtifact, Resource, SubmittedDeliveryConfig,
    };
    pub use crate::errors::{NotFoundError, PromoterError, Result, ValidationError};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::persistence::Repositories;
    pub use crate::resources::{ResourceHandler, ResourceHandlerRegistry};
    pub use crate::utils::{Clock, SystemClock, Timestamp};
    pub use crate::verification::{VerificationEvaluator, VerificationRunner};
    pub use crate::veto::{UnhappyVeto, Veto, VetoEnforcer};
    pub use std::sync::Arc;
}
