//! Picks the version each environment should be promoted to.

use super::ConstraintEvaluator;
use crate::core::{DeliveryArtifact, DeliveryConfig, Environment};
use crate::errors::Result;
use crate::persistence::{ArtifactRepository, DeliveryConfigRepository};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Everything needed to evaluate one (environment, artifact) pair.
#[derive(Debug, Clone)]
pub struct EnvironmentContext {
    /// The owning config.
    pub config: DeliveryConfig,
    /// The environment being promoted into.
    pub environment: Environment,
    /// The artifact.
    pub artifact: DeliveryArtifact,
    /// Candidate versions, newest first.
    pub versions: Vec<String>,
    /// Versions barred from the environment.
    pub vetoed_versions: BTreeSet<String>,
}

/// Runs constraint evaluators and queues passing versions for approval.
///
/// Approval itself happens in the
/// [`EnvironmentPromotionChecker`](crate::actuation::EnvironmentPromotionChecker).
pub struct EnvironmentConstraintRunner {
    artifacts: Arc<dyn ArtifactRepository>,
    configs: Arc<dyn DeliveryConfigRepository>,
    evaluators: Vec<Arc<dyn ConstraintEvaluator>>,
}

impl EnvironmentConstraintRunner {
    /// Creates a runner over a fixed set of evaluators.
    #[must_use]
    pub fn new(
        artifacts: Arc<dyn ArtifactRepository>,
        configs: Arc<dyn DeliveryConfigRepository>,
        evaluators: Vec<Arc<dyn ConstraintEvaluator>>,
    ) -> Self {
        Self {
            artifacts,
            configs,
            evaluators,
        }
    }

    /// Returns true if any implicit evaluator is registered.
    #[must_use]
    pub fn has_implicit_constraints(&self) -> bool {
        self.evaluators.iter().any(|e| e.is_implicit())
    }

    fn declares_stateful(&self, environment: &Environment) -> bool {
        environment.constraints.iter().any(|constraint| {
            self.evaluators
                .iter()
                .any(|e| e.is_stateful() && e.supported_type() == constraint.constraint_type())
        })
    }

    /// Evaluates the environment and queues the version it should run.
    pub async fn check_environment(&self, context: &EnvironmentContext) -> Result<()> {
        for constraint in &context.environment.constraints {
            if !self
                .evaluators
                .iter()
                .any(|e| e.supported_type() == constraint.constraint_type())
            {
                warn!(
                    environment = %context.environment.name,
                    constraint = %constraint.constraint_type(),
                    "No evaluator registered for constraint; ignoring it"
                );
            }
        }

        let mut pending_older = if self.declares_stateful(&context.environment) {
            self.pending_versions(context).await?
        } else {
            Vec::new()
        };

        self.check_newest(context, &mut pending_older).await?;
        self.handle_older_pending_versions(context, &pending_older).await
    }

    async fn pending_versions(&self, context: &EnvironmentContext) -> Result<Vec<String>> {
        let pending: BTreeSet<String> = self
            .configs
            .pending_constraint_versions(&context.config.name, &context.environment.name, &context.artifact.reference)
            .await?
            .into_iter()
            .collect();
        Ok(context
            .versions
            .iter()
            .filter(|v| pending.contains(*v))
            .cloned()
            .collect())
    }

    async fn check_newest(&self, context: &EnvironmentContext, pending_older: &mut Vec<String>) -> Result<()> {
        debug!(
            artifact = %context.artifact,
            environment = %context.environment.name,
            versions = ?context.versions,
            vetoed = ?context.vetoed_versions,
            "Checking constraints"
        );
        let stateful = self.declares_stateful(&context.environment);

        for version in &context.versions {
            if context.vetoed_versions.contains(version) {
                continue;
            }
            pending_older.retain(|v| v != version);

            let passes = self.passes_all(context, version).await?;
            let is_pending = stateful
                && self
                    .configs
                    .pending_constraint_versions(
                        &context.config.name,
                        &context.environment.name,
                        &context.artifact.reference,
                    )
                    .await?
                    .iter()
                    .any(|v| v == version);

            debug!(
                version = %version,
                environment = %context.environment.name,
                passes,
                is_pending,
                "Evaluated version"
            );

            // Park on a pending version rather than falling back to an older one.
            if passes || is_pending {
                if !is_pending {
                    self.queue_for_approval(context, version).await?;
                }
                return Ok(());
            }
        }
        Ok(())
    }

    async fn handle_older_pending_versions(&self, context: &EnvironmentContext, pending: &[String]) -> Result<()> {
        if !pending.is_empty() {
            debug!(environment = %context.environment.name, pending = ?pending, "Rechecking older pending versions");
        }
        for version in pending.iter().rev() {
            if self.passes_all(context, version).await? {
                self.queue_for_approval(context, version).await?;
            }
        }
        Ok(())
    }

    /// Stateless constraints first; stateful ones only run once those pass.
    async fn passes_all(&self, context: &EnvironmentContext, version: &str) -> Result<bool> {
        Ok(self.passes(context, version, false).await? && self.passes(context, version, true).await?)
    }

    async fn passes(&self, context: &EnvironmentContext, version: &str, stateful: bool) -> Result<bool> {
        for evaluator in self.evaluators.iter().filter(|e| e.is_stateful() == stateful) {
            let applies = evaluator.is_implicit() || context.environment.has_constraint(evaluator.supported_type());
            if applies
                && !evaluator
                    .can_promote(&context.artifact, version, &context.config, &context.environment)
                    .await?
            {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn queue_for_approval(&self, context: &EnvironmentContext, version: &str) -> Result<()> {
        let latest = self
            .artifacts
            .latest_version_approved_in(&context.config, &context.artifact, &context.environment.name)
            .await?;
        if latest.as_deref() == Some(version) {
            debug!(version = %version, environment = %context.environment.name, "Already approved; not queueing");
            return Ok(());
        }
        debug!(version = %version, environment = %context.environment.name, "Queueing version for approval");
        self.configs
            .queue_approval(
                &context.config.name,
                &context.artifact.reference,
                version,
                &context.environment.name,
            )
            .await
    }
}

impl std::fmt::Debug for EnvironmentConstraintRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvironmentConstraintRunner")
            .field("evaluators", &self.evaluators)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ConstraintState, ConstraintStatus, MANUAL_JUDGEMENT};
    use crate::persistence::{InMemoryArtifactRepository, InMemoryDeliveryConfigRepository};
    use crate::testing::{fixtures, ScriptedConstraintEvaluator};
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    struct Fixture {
        artifacts: Arc<InMemoryArtifactRepository>,
        configs: Arc<InMemoryDeliveryConfigRepository>,
        config: DeliveryConfig,
    }

    async fn fixture() -> Fixture {
        let artifacts = Arc::new(InMemoryArtifactRepository::new());
        let configs = Arc::new(InMemoryDeliveryConfigRepository::new());
        let config = fixtures::delivery_config();
        artifacts.register(&fixtures::keeldemo_deb()).await.unwrap();
        configs.store(&config).await.unwrap();
        Fixture {
            artifacts,
            configs,
            config,
        }
    }

    impl Fixture {
        fn runner(&self, evaluators: Vec<Arc<dyn ConstraintEvaluator>>) -> EnvironmentConstraintRunner {
            EnvironmentConstraintRunner::new(self.artifacts.clone(), self.configs.clone(), evaluators)
        }

        fn context(&self, environment: &str, versions: &[&str], vetoed: &[&str]) -> EnvironmentContext {
            EnvironmentContext {
                config: self.config.clone(),
                environment: self.config.environment(environment).unwrap().clone(),
                artifact: fixtures::keeldemo_deb(),
                versions: versions.iter().map(ToString::to_string).collect(),
                vetoed_versions: vetoed.iter().map(ToString::to_string).collect(),
            }
        }

        async fn queued(&self, environment: &str) -> Vec<String> {
            self.configs
                .queued_approvals(&self.config.name, fixtures::DEB_REFERENCE, environment)
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn test_unconstrained_environment_queues_newest_non_vetoed() {
        let f = fixture().await;
        let runner = f.runner(vec![]);
        runner
            .check_environment(&f.context("test", &["v3", "v2", "v1"], &["v3"]))
            .await
            .unwrap();
        assert_eq!(f.queued("test").await, vec!["v2"]);
    }

    #[tokio::test]
    async fn test_selects_newest_passing_version() {
        let f = fixture().await;
        let depends_on = Arc::new(ScriptedConstraintEvaluator::stateless("depends-on").passing(["v2", "v1"]));
        let runner = f.runner(vec![depends_on.clone()]);

        runner
            .check_environment(&f.context("staging", &["v3", "v2", "v1"], &[]))
            .await
            .unwrap();

        assert_eq!(f.queued("staging").await, vec!["v2"]);
        assert_eq!(depends_on.calls(), vec!["v3", "v2"]);
    }

    #[tokio::test]
    async fn test_stateful_constraints_only_run_after_stateless_pass() {
        let f = fixture().await;
        let depends_on = Arc::new(ScriptedConstraintEvaluator::stateless("depends-on").passing(["v1"]));
        let judgement = Arc::new(ScriptedConstraintEvaluator::stateful(MANUAL_JUDGEMENT).passing(["v1"]));
        let runner = f.runner(vec![depends_on, judgement.clone()]);

        runner
            .check_environment(&f.context("production", &["v2", "v1"], &[]))
            .await
            .unwrap();

        assert_eq!(judgement.calls(), vec!["v1"]);
        assert_eq!(f.queued("production").await, vec!["v1"]);
    }

    #[tokio::test]
    async fn test_parks_on_pending_version_and_rechecks_older_ones() {
        let f = fixture().await;
        let now = Utc::now();
        for version in ["v1", "v2"] {
            f.configs
                .store_constraint_state(&ConstraintState::pending(
                    &f.config.name,
                    "production",
                    fixtures::DEB_REFERENCE,
                    version,
                    MANUAL_JUDGEMENT,
                    now,
                ))
                .await
                .unwrap();
        }
        // v1 was approved by a user after the previous scan.
        let v1 = ConstraintState::pending(&f.config.name, "production", fixtures::DEB_REFERENCE, "v1", MANUAL_JUDGEMENT, now)
            .judged(ConstraintStatus::Pass, "someone", now, None);
        f.configs.store_constraint_state(&v1).await.unwrap();

        let depends_on = Arc::new(ScriptedConstraintEvaluator::stateless("depends-on").passing(["v3", "v2", "v1"]));
        let judgement = Arc::new(ScriptedConstraintEvaluator::stateful(MANUAL_JUDGEMENT).passing(["v1"]));
        let runner = f.runner(vec![depends_on, judgement.clone()]);

        // v3 fails judgement and has no pending state, v2 is pending: the scan parks on v2.
        f.configs
            .store_constraint_state(
                &ConstraintState::pending(&f.config.name, "production", fixtures::DEB_REFERENCE, "v3", MANUAL_JUDGEMENT, now)
                    .judged(ConstraintStatus::Fail, "someone", now, None),
            )
            .await
            .unwrap();
        runner
            .check_environment(&f.context("production", &["v3", "v2", "v1"], &[]))
            .await
            .unwrap();

        assert_eq!(judgement.calls(), vec!["v3", "v2"]);
        assert!(f.queued("production").await.is_empty());

        // Now v1 gets a pending state again and is rechecked oldest-first after the scan.
        f.configs
            .store_constraint_state(&ConstraintState::pending(
                &f.config.name,
                "production",
                fixtures::DEB_REFERENCE,
                "v1",
                MANUAL_JUDGEMENT,
                now,
            ))
            .await
            .unwrap();
        runner
            .check_environment(&f.context("production", &["v3", "v2", "v1"], &[]))
            .await
            .unwrap();
        assert_eq!(f.queued("production").await, vec!["v1"]);
    }

    #[tokio::test]
    async fn test_does_not_queue_already_approved_version() {
        let f = fixture().await;
        f.artifacts
            .store_version(&fixtures::deb_version("keeldemo-1.0.0-h1.aaaaaaa"))
            .await
            .unwrap();
        f.artifacts
            .approve_version_for(&f.config, &fixtures::keeldemo_deb(), "keeldemo-1.0.0-h1.aaaaaaa", "test")
            .await
            .unwrap();

        f.runner(vec![])
            .check_environment(&f.context("test", &["keeldemo-1.0.0-h1.aaaaaaa"], &[]))
            .await
            .unwrap();
        assert!(f.queued("test").await.is_empty());
    }

    #[tokio::test]
    async fn test_implicit_evaluators_apply_everywhere() {
        let f = fixture().await;
        let implicit = Arc::new(ScriptedConstraintEvaluator::stateless("implicit").implicit().passing(["v1"]));
        let runner = f.runner(vec![implicit]);
        assert!(runner.has_implicit_constraints());

        runner
            .check_environment(&f.context("test", &["v2", "v1"], &[]))
            .await
            .unwrap();
        assert_eq!(f.queued("test").await, vec!["v1"]);
    }
}
