use super::{VerificationEvaluator, VerificationTarget};
use crate::core::VerificationStatus;
use crate::errors::{PromoterError, Result};
use crate::persistence::{ArtifactRepository, DeliveryConfigRepository};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Runs an environment's verifications one at a time, in declaration order.
pub struct VerificationRunner {
    artifacts: Arc<dyn ArtifactRepository>,
    configs: Arc<dyn DeliveryConfigRepository>,
    evaluators: Vec<Arc<dyn VerificationEvaluator>>,
}

impl VerificationRunner {
    /// Creates a runner.
    #[must_use]
    pub fn new(
        artifacts: Arc<dyn ArtifactRepository>,
        configs: Arc<dyn DeliveryConfigRepository>,
        evaluators: Vec<Arc<dyn VerificationEvaluator>>,
    ) -> Self {
        Self {
            artifacts,
            configs,
            evaluators,
        }
    }

    /// Launches the next verification for a target unless one is still running.
    pub async fn run_verifications_for(&self, target: &VerificationTarget) -> Result<()> {
        let context = target.context();
        let mut outstanding = None;

        for verification in &target.environment.verify_with {
            let status = self
                .configs
                .get_verification_state(&context, &verification.id)
                .await?
                .map(|state| state.status);
            match status {
                Some(VerificationStatus::Running) => {
                    debug!(environment = %context.environment, verification = %verification.id, "Verification already running");
                    return Ok(());
                }
                None if outstanding.is_none() => outstanding = Some(verification),
                _ => {}
            }
        }

        let Some(verification) = outstanding else {
            debug!(environment = %context.environment, version = %context.version, "Verification complete");
            return Ok(());
        };

        let evaluator = self
            .evaluators
            .iter()
            .find(|e| e.supported_type() == verification.verification_type)
            .ok_or_else(|| {
                PromoterError::internal(format!(
                    "No verification evaluator supports type {}",
                    verification.verification_type
                ))
            })?;

        let metadata = evaluator
            .start(&context, verification)
            .await
            .map_err(PromoterError::Handler)?;
        self.configs
            .update_verification_state(&context, &verification.id, VerificationStatus::Running, metadata)
            .await?;
        info!(
            verification = %verification.id,
            environment = %context.environment,
            version = %context.version,
            "Launched verification"
        );
        Ok(())
    }

    /// Targets for environments due for a verification check: the current
    /// version of each artifact in each due environment.
    pub async fn next_environments_for_verification(
        &self,
        min_age: Duration,
        limit: usize,
    ) -> Result<Vec<VerificationTarget>> {
        let due = self
            .configs
            .environments_due_for_verification(min_age, limit)
            .await?;

        let mut targets = Vec::new();
        for (config, environment_name) in due {
            let Some(environment) = config.environment(&environment_name).cloned() else {
                continue;
            };
            for artifact in &config.artifacts {
                if let Some(version) = self
                    .artifacts
                    .current_version_in(&config, artifact, &environment.name)
                    .await?
                {
                    targets.push(VerificationTarget {
                        config: config.clone(),
                        environment: environment.clone(),
                        artifact: artifact.clone(),
                        version,
                    });
                }
            }
        }
        Ok(targets)
    }
}

impl std::fmt::Debug for VerificationRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationRunner")
            .field("evaluators", &self.evaluators.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Verification;
    use crate::persistence::{InMemoryArtifactRepository, InMemoryDeliveryConfigRepository};
    use crate::testing::fixtures;
    use crate::verification::MockVerificationEvaluator;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const V1: &str = "keeldemo-1.0.1-h1.a1b2c3d";

    struct Fixture {
        runner: VerificationRunner,
        artifacts: Arc<InMemoryArtifactRepository>,
        configs: Arc<InMemoryDeliveryConfigRepository>,
        target: VerificationTarget,
    }

    async fn fixture(evaluator: MockVerificationEvaluator) -> Fixture {
        let artifacts = Arc::new(InMemoryArtifactRepository::new());
        let configs = Arc::new(InMemoryDeliveryConfigRepository::new());
        let mut config = fixtures::delivery_config_with_verification();
        config.environments[0].verify_with.push(Verification {
            id: "canary".to_string(),
            verification_type: "test-container".to_string(),
            config: json!({}),
        });
        artifacts.register(&fixtures::keeldemo_deb()).await.unwrap();
        artifacts.store_version(&fixtures::deb_version(V1)).await.unwrap();
        configs.store(&config).await.unwrap();

        let target = VerificationTarget {
            environment: config.environments[0].clone(),
            artifact: fixtures::keeldemo_deb(),
            version: V1.to_string(),
            config,
        };
        let runner = VerificationRunner::new(artifacts.clone(), configs.clone(), vec![Arc::new(evaluator)]);
        Fixture {
            runner,
            artifacts,
            configs,
            target,
        }
    }

    fn evaluator(expected_launches: usize) -> MockVerificationEvaluator {
        let mut evaluator = MockVerificationEvaluator::new();
        evaluator
            .expect_supported_type()
            .return_const("test-container".to_string());
        evaluator
            .expect_start()
            .times(expected_launches)
            .returning(|_, _| Ok(json!({"task": "T-1"})));
        evaluator
    }

    impl Fixture {
        async fn status(&self, id: &str) -> Option<VerificationStatus> {
            self.configs
                .get_verification_state(&self.target.context(), id)
                .await
                .unwrap()
                .map(|s| s.status)
        }
    }

    #[tokio::test]
    async fn test_launches_first_verification_and_waits_for_it() {
        let f = fixture(evaluator(1)).await;

        f.runner.run_verifications_for(&f.target).await.unwrap();
        f.runner.run_verifications_for(&f.target).await.unwrap();

        assert_eq!(f.status("smoke").await, Some(VerificationStatus::Running));
        assert_eq!(f.status("canary").await, None);
    }

    #[tokio::test]
    async fn test_launches_next_once_previous_finished() {
        let f = fixture(evaluator(2)).await;
        f.runner.run_verifications_for(&f.target).await.unwrap();
        f.configs
            .update_verification_state(&f.target.context(), "smoke", VerificationStatus::Pass, json!({}))
            .await
            .unwrap();

        f.runner.run_verifications_for(&f.target).await.unwrap();
        assert_eq!(f.status("canary").await, Some(VerificationStatus::Running));

        f.configs
            .update_verification_state(&f.target.context(), "canary", VerificationStatus::Fail, json!({}))
            .await
            .unwrap();
        f.runner.run_verifications_for(&f.target).await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_verification_type_fails() {
        let mut evaluator = MockVerificationEvaluator::new();
        evaluator.expect_supported_type().return_const("canary".to_string());
        evaluator.expect_start().never();
        let f = fixture(evaluator).await;

        assert!(f.runner.run_verifications_for(&f.target).await.is_err());
    }

    #[tokio::test]
    async fn test_targets_only_environments_with_a_current_version() {
        let f = fixture(evaluator(0)).await;
        let none = f
            .runner
            .next_environments_for_verification(Duration::ZERO, 10)
            .await
            .unwrap();
        assert!(none.is_empty());

        f.artifacts
            .mark_as_successfully_deployed_to(&f.target.config, &f.target.artifact, V1, "test")
            .await
            .unwrap();
        let targets = f
            .runner
            .next_environments_for_verification(Duration::ZERO, 10)
            .await
            .unwrap();
        assert_eq!(targets, vec![f.target.clone()]);
    }
}
