//! Shared persistence for stateful constraint evaluators.

use crate::core::{ConstraintState, ConstraintStatus, DeliveryArtifact, DeliveryConfig, DeliveryEvent};
use crate::errors::Result;
use crate::events::{publish, EventSink};
use crate::persistence::DeliveryConfigRepository;
use crate::utils::Clock;
use std::sync::Arc;
use tracing::info;

/// Reads and writes [`ConstraintState`]s, publishing a
/// [`DeliveryEvent::ConstraintStateChanged`] whenever a status changes.
#[derive(Clone)]
pub struct StatefulConstraintSupport {
    repository: Arc<dyn DeliveryConfigRepository>,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
}

impl StatefulConstraintSupport {
    /// Creates the helper.
    #[must_use]
    pub fn new(
        repository: Arc<dyn DeliveryConfigRepository>,
        events: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repository,
            events,
            clock,
        }
    }

    /// The clock judgements are stamped with.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Returns the stored state, creating a pending one on first sight.
    pub async fn get_or_create(
        &self,
        constraint_type: &str,
        artifact: &DeliveryArtifact,
        version: &str,
        config: &DeliveryConfig,
        environment: &str,
    ) -> Result<ConstraintState> {
        if let Some(state) = self
            .repository
            .get_constraint_state(&config.name, environment, version, constraint_type)
            .await?
        {
            return Ok(state);
        }

        let state = ConstraintState::pending(
            &config.name,
            environment,
            &artifact.reference,
            version,
            constraint_type,
            self.clock.now(),
        );
        self.store(None, &state).await?;
        Ok(state)
    }

    /// Persists `state`, publishing the transition from `previous` if the status changed.
    pub async fn store(&self, previous: Option<ConstraintStatus>, state: &ConstraintState) -> Result<()> {
        self.repository.store_constraint_state(state).await?;
        if previous != Some(state.status) {
            info!(
                environment = %state.environment_name,
                constraint = %state.constraint_type,
                version = %state.artifact_version,
                status = %state.status,
                "Constraint state changed"
            );
            publish(
                self.events.as_ref(),
                &DeliveryEvent::ConstraintStateChanged {
                    environment: state.environment_name.clone(),
                    constraint_type: state.constraint_type.clone(),
                    version: state.artifact_version.clone(),
                    previous_status: previous.map(|s| s.to_string()),
                    status: state.status.to_string(),
                },
            )
            .await;
        }
        Ok(())
    }

    /// Records a judgement made outside the engine, e.g. a user approving a manual judgement.
    #[allow(clippy::too_many_arguments)]
    pub async fn judge(
        &self,
        config: &DeliveryConfig,
        environment: &str,
        artifact: &DeliveryArtifact,
        version: &str,
        constraint_type: &str,
        status: ConstraintStatus,
        judged_by: &str,
        comment: Option<String>,
    ) -> Result<ConstraintState> {
        let current = self
            .get_or_create(constraint_type, artifact, version, config, environment)
            .await?;
        let previous = current.status;
        let judged = current.judged(status, judged_by, self.clock.now(), comment);
        self.store(Some(previous), &judged).await?;
        Ok(judged)
    }
}

impl std::fmt::Debug for StatefulConstraintSupport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatefulConstraintSupport").finish_non_exhaustive()
    }
}
