//! Implicit artifact-type constraint.

use super::ConstraintEvaluator;
use crate::core::{DeliveryArtifact, DeliveryConfig, Environment};
use crate::errors::Result;
use async_trait::async_trait;

/// Type tag of [`ArtifactTypeConstraintEvaluator`].
pub const ARTIFACT_TYPE: &str = "artifact-type";

/// Only lets an artifact into environments where some resource deploys an
/// artifact of the same type.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArtifactTypeConstraintEvaluator;

#[async_trait]
impl ConstraintEvaluator for ArtifactTypeConstraintEvaluator {
    fn supported_type(&self) -> &str {
        ARTIFACT_TYPE
    }

    fn is_implicit(&self) -> bool {
        true
    }

    async fn can_promote(
        &self,
        artifact: &DeliveryArtifact,
        _version: &str,
        config: &DeliveryConfig,
        environment: &Environment,
    ) -> Result<bool> {
        Ok(environment
            .resources
            .iter()
            .filter_map(|resource| resource.artifact_reference())
            .filter_map(|reference| config.artifact(reference))
            .any(|used| used.artifact_type == artifact.artifact_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TagVersionStrategy;
    use crate::testing::fixtures;

    #[tokio::test]
    async fn test_matches_types_used_by_environment_resources() {
        let config = fixtures::delivery_config();
        let test = config.environment("test").unwrap();
        let evaluator = ArtifactTypeConstraintEvaluator;

        assert!(evaluator
            .can_promote(&fixtures::keeldemo_deb(), "v1", &config, test)
            .await
            .unwrap());
        assert!(!evaluator
            .can_promote(&fixtures::docker_artifact(TagVersionStrategy::IncreasingTag), "1", &config, test)
            .await
            .unwrap());
    }
}
