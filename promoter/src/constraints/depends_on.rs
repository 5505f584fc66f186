//! Depends-on: a version must have shipped to an earlier environment first.

use super::ConstraintEvaluator;
use crate::core::{
    Constraint, DeliveryArtifact, DeliveryConfig, Environment, VerificationStatus, DEPENDS_ON,
};
use crate::errors::{NotFoundError, Result};
use crate::persistence::{ArtifactRepository, DeliveryConfigRepository, VerificationContext};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Passes when the version was deployed to the required environment and every
/// verification declared there passed against it.
pub struct DependsOnConstraintEvaluator {
    artifacts: Arc<dyn ArtifactRepository>,
    configs: Arc<dyn DeliveryConfigRepository>,
}

impl DependsOnConstraintEvaluator {
    /// Creates the evaluator.
    #[must_use]
    pub fn new(artifacts: Arc<dyn ArtifactRepository>, configs: Arc<dyn DeliveryConfigRepository>) -> Self {
        Self { artifacts, configs }
    }

    async fn all_verifications_passed(
        &self,
        config: &DeliveryConfig,
        artifact: &DeliveryArtifact,
        version: &str,
        environment: &Environment,
    ) -> Result<bool> {
        let context = VerificationContext {
            delivery_config_name: config.name.clone(),
            environment: environment.name.clone(),
            artifact_reference: artifact.reference.clone(),
            version: version.to_string(),
        };
        for verification in &environment.verify_with {
            let status = self
                .configs
                .get_verification_state(&context, &verification.id)
                .await?
                .map(|state| state.status);
            if status != Some(VerificationStatus::Pass) {
                debug!(
                    verification = %verification.id,
                    environment = %environment.name,
                    version = %version,
                    status = ?status,
                    "Verification has not passed"
                );
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[async_trait]
impl ConstraintEvaluator for DependsOnConstraintEvaluator {
    fn supported_type(&self) -> &str {
        DEPENDS_ON
    }

    async fn can_promote(
        &self,
        artifact: &DeliveryArtifact,
        version: &str,
        config: &DeliveryConfig,
        environment: &Environment,
    ) -> Result<bool> {
        let Some(Constraint::DependsOn { environment: required }) = environment.constraint(DEPENDS_ON) else {
            return Ok(true);
        };
        let required = config.environment(required).ok_or_else(|| NotFoundError::NoSuchEnvironment {
            delivery_config: config.name.clone(),
            environment: required.clone(),
        })?;

        Ok(self
            .artifacts
            .was_successfully_deployed_to(config, artifact, version, &required.name)
            .await?
            && self
                .all_verifications_passed(config, artifact, version, required)
                .await?)
    }
}
