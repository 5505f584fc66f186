//! Approves artifact versions for the environments of a delivery config.

use crate::constraints::{EnvironmentConstraintRunner, EnvironmentContext};
use crate::core::{
    DeliveryArtifact, DeliveryConfig, DeliveryEvent, EnvironmentArtifactPin, EnvironmentArtifactVetoes,
};
use crate::errors::Result;
use crate::events::{publish, EventSink};
use crate::persistence::{ArtifactRepository, DeliveryConfigRepository};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Decides, per artifact and environment, which version is approved.
///
/// Pinned environments get their pinned version. Environments without
/// constraints get the newest non-vetoed version when no implicit constraint
/// applies. Everything else goes through the [`EnvironmentConstraintRunner`],
/// whose queued versions are approved here.
pub struct EnvironmentPromotionChecker {
    artifacts: Arc<dyn ArtifactRepository>,
    configs: Arc<dyn DeliveryConfigRepository>,
    runner: EnvironmentConstraintRunner,
    events: Arc<dyn EventSink>,
}

impl EnvironmentPromotionChecker {
    /// Creates a checker.
    #[must_use]
    pub fn new(
        artifacts: Arc<dyn ArtifactRepository>,
        configs: Arc<dyn DeliveryConfigRepository>,
        runner: EnvironmentConstraintRunner,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            artifacts,
            configs,
            runner,
            events,
        }
    }

    /// Checks every environment of a config. Environments are evaluated one after another.
    pub async fn check_environments(&self, config: &DeliveryConfig) -> Result<()> {
        let pins = self.artifacts.pinned_environments(config).await?;
        let vetoes = self.artifacts.vetoed_environment_versions(config).await?;

        for artifact in &config.artifacts {
            let versions = self.artifacts.versions(artifact).await?;
            if versions.is_empty() {
                warn!(
                    artifact = %artifact.name,
                    artifact_type = %artifact.artifact_type,
                    "No versions for artifact are known"
                );
                continue;
            }

            for environment in &config.environments {
                if let Some(pin) = pinned(&pins, &environment.name, &artifact.reference) {
                    debug!(environment = %environment.name, version = %pin.version, "Environment is pinned");
                    self.approve(config, artifact, &pin.version, &environment.name).await?;
                    continue;
                }

                let vetoed_versions = vetoed(&vetoes, &environment.name, &artifact.reference);
                if environment.constraints.is_empty() && !self.runner.has_implicit_constraints() {
                    match versions.iter().find(|v| !vetoed_versions.contains(*v)) {
                        Some(version) => self.approve(config, artifact, version, &environment.name).await?,
                        None => warn!(
                            artifact = %artifact.name,
                            environment = %environment.name,
                            "Every version is vetoed for environment"
                        ),
                    }
                    continue;
                }

                let context = EnvironmentContext {
                    config: config.clone(),
                    environment: environment.clone(),
                    artifact: artifact.clone(),
                    versions: versions.clone(),
                    vetoed_versions,
                };
                self.runner.check_environment(&context).await?;

                let queued = self
                    .configs
                    .queued_approvals(&config.name, &artifact.reference, &environment.name)
                    .await?;
                for version in queued {
                    self.approve(config, artifact, &version, &environment.name).await?;
                    self.configs
                        .delete_queued_approval(&config.name, &artifact.reference, &version, &environment.name)
                        .await?;
                }
            }
        }
        Ok(())
    }

    async fn approve(
        &self,
        config: &DeliveryConfig,
        artifact: &DeliveryArtifact,
        version: &str,
        environment: &str,
    ) -> Result<()> {
        if !self
            .artifacts
            .approve_version_for(config, artifact, version, environment)
            .await?
        {
            return Ok(());
        }
        info!(
            artifact = %artifact.name,
            artifact_type = %artifact.artifact_type,
            version,
            delivery_config = %config.name,
            environment,
            application = %config.application,
            "Approved artifact version"
        );
        publish(
            self.events.as_ref(),
            &DeliveryEvent::ArtifactVersionApproved {
                application: config.application.clone(),
                delivery_config: config.name.clone(),
                environment: environment.to_string(),
                reference: artifact.reference.clone(),
                version: version.to_string(),
            },
        )
        .await;
        Ok(())
    }
}

impl std::fmt::Debug for EnvironmentPromotionChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvironmentPromotionChecker")
            .field("runner", &self.runner)
            .finish_non_exhaustive()
    }
}

fn pinned<'a>(
    pins: &'a [EnvironmentArtifactPin],
    environment: &str,
    reference: &str,
) -> Option<&'a EnvironmentArtifactPin> {
    pins.iter()
        .find(|pin| pin.target_environment == environment && pin.reference == reference)
}

fn vetoed(vetoes: &[EnvironmentArtifactVetoes], environment: &str, reference: &str) -> BTreeSet<String> {
    vetoes
        .iter()
        .find(|v| v.target_environment == environment && v.reference == reference)
        .map(|v| v.versions.clone())
        .unwrap_or_default()
}
