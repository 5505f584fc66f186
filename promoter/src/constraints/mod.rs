//! Promotion constraints and the runner that evaluates them.
//!
//! Evaluators are either *explicit* (run only when an environment declares a
//! constraint of their type) or *implicit* (run for every environment), and
//! either *stateless* (recomputed every check) or *stateful* (a persisted
//! [`ConstraintState`](crate::core::ConstraintState) judgement).

mod artifact_type;
mod depends_on;
mod manual_judgement;
mod runner;
mod stateful;

pub use artifact_type::{ArtifactTypeConstraintEvaluator, ARTIFACT_TYPE};
pub use depends_on::DependsOnConstraintEvaluator;
pub use manual_judgement::ManualJudgementConstraintEvaluator;
pub use runner::{EnvironmentConstraintRunner, EnvironmentContext};
pub use stateful::StatefulConstraintSupport;

use crate::core::{DeliveryArtifact, DeliveryConfig, Environment};
use crate::errors::Result;
use async_trait::async_trait;

/// Decides whether a version may be promoted into an environment.
#[async_trait]
pub trait ConstraintEvaluator: Send + Sync {
    /// The constraint type tag this evaluator handles.
    fn supported_type(&self) -> &str;

    /// Implicit evaluators run for every environment.
    fn is_implicit(&self) -> bool {
        false
    }

    /// Stateful evaluators persist their judgement.
    fn is_stateful(&self) -> bool {
        false
    }

    /// Returns true if `version` may be promoted into `environment`.
    async fn can_promote(
        &self,
        artifact: &DeliveryArtifact,
        version: &str,
        config: &DeliveryConfig,
        environment: &Environment,
    ) -> Result<bool>;
}

impl std::fmt::Debug for dyn ConstraintEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConstraintEvaluator")
            .field("type", &self.supported_type())
            .field("implicit", &self.is_implicit())
            .field("stateful", &self.is_stateful())
            .finish()
    }
}
