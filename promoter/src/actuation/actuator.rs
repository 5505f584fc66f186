//! Reconciles one resource per check.

use crate::core::{
    DeliveryEvent, EnvironmentArtifactVeto, Resource, ResourceDiff, ResourceHistoryKind, ResourceRef,
};
use crate::errors::{HandlerError, PromoterError, ResolutionError, Result};
use crate::events::{publish, EventSink};
use crate::persistence::Repositories;
use crate::resources::{ActuationPauser, DesiredState, ResourceHandler, ResourceHandlerRegistry};
use crate::veto::{VetoEnforcer, VetoResponse};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Veto whose denials keep the resource's status as-is instead of publishing a vetoed event.
const UNHAPPY_VETO: &str = "UnhappyVeto";

/// What one check did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActuationOutcome {
    /// The resource or its application is paused.
    SkippedPaused,
    /// Previously launched tasks are still running.
    SkippedInProgress,
    /// A veto blocked actuation.
    Vetoed {
        /// The denying veto.
        veto: String,
    },
    /// The resource was missing and creation was launched.
    Created,
    /// The resource drifted and an update was launched.
    Updated,
    /// The resource matches its desired state.
    Valid,
    /// The resource matches its desired state after earlier drift.
    DeltaResolved,
    /// The resource's dependencies are not ready.
    Unresolvable,
    /// The check failed; it is retried on the next cycle.
    Failed,
}

/// Drives resources toward their desired state.
pub struct ResourceActuator {
    repositories: Repositories,
    handlers: Arc<ResourceHandlerRegistry>,
    pauser: ActuationPauser,
    vetoes: Arc<VetoEnforcer>,
    events: Arc<dyn EventSink>,
    artifact_veto_failures: AtomicU64,
}

impl ResourceActuator {
    /// Creates an actuator.
    #[must_use]
    pub fn new(
        repositories: Repositories,
        handlers: Arc<ResourceHandlerRegistry>,
        vetoes: Arc<VetoEnforcer>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let pauser = ActuationPauser::new(
            repositories.resources.clone(),
            repositories.paused.clone(),
            events.clone(),
        );
        Self {
            repositories,
            handlers,
            pauser,
            vetoes,
            events,
            artifact_veto_failures: AtomicU64::new(0),
        }
    }

    /// Failed attempts to veto an artifact version on behalf of a resource veto.
    #[must_use]
    pub fn artifact_veto_failures(&self) -> u64 {
        self.artifact_veto_failures.load(Ordering::Relaxed)
    }

    /// Checks one resource and launches corrective action if needed.
    ///
    /// Handler failures are reported as events and yield [`ActuationOutcome::Failed`]
    /// or [`ActuationOutcome::Unresolvable`]. An error is returned only when no
    /// handler supports the resource's kind or the pause state cannot be read.
    pub async fn check_resource(&self, resource: &Resource) -> Result<ActuationOutcome> {
        let handler = self.handlers.supporting(&resource.kind)?;

        if self.pauser.is_paused(resource).await? {
            debug!(resource_id = %resource.id, "Actuation is paused, skipping checks");
            self.skipped(resource, "ActuationPaused").await;
            return Ok(ActuationOutcome::SkippedPaused);
        }

        match self.reconcile(resource, handler.as_ref()).await {
            Ok(outcome) => Ok(outcome),
            Err(PromoterError::CurrentlyUnresolvable { message, .. }) => {
                warn!(resource_id = %resource.id, %message, "Resource check failed (hopefully temporarily)");
                self.record(DeliveryEvent::ResourceCheckUnresolvable {
                    resource: ResourceRef::from(resource),
                    message,
                })
                .await;
                Ok(ActuationOutcome::Unresolvable)
            }
            Err(e) => {
                error!(resource_id = %resource.id, error = %e, "Resource check failed");
                self.record(DeliveryEvent::ResourceCheckError {
                    resource: ResourceRef::from(resource),
                    error: e.to_string(),
                })
                .await;
                Ok(ActuationOutcome::Failed)
            }
        }
    }

    async fn reconcile(&self, resource: &Resource, handler: &dyn ResourceHandler) -> Result<ActuationOutcome> {
        let id = resource.id.as_str();

        if handler
            .actuation_in_progress(resource)
            .await
            .map_err(|e| handler_failure(id, e))?
        {
            debug!(resource_id = %id, "Actuation already running, skipping checks");
            self.skipped(resource, "ActuationInProgress").await;
            return Ok(ActuationOutcome::SkippedInProgress);
        }

        let (DesiredState { spec, resolved }, current) = resolve(resource, handler).await?;
        let diff = ResourceDiff::new(spec, current);
        if diff.has_changes() {
            self.repositories.diff_fingerprints.store(id, &diff).await?;
        }

        let response = self.vetoes.can_check(resource).await?;
        if !response.allowed {
            return Ok(self.vetoed(resource, &resolved, response).await);
        }

        debug!(resource_id = %id, "Checking resource");
        let reference = ResourceRef::from(&resolved);

        if diff.current().is_none() {
            warn!(resource_id = %id, "Resource is missing");
            self.record(DeliveryEvent::ResourceMissing {
                resource: reference.clone(),
            })
            .await;
            let tasks = handler
                .create(&resolved, &diff)
                .await
                .map_err(|e| handler_failure(id, e))?;
            self.repositories.diff_fingerprints.mark_action_taken(id).await?;
            self.record(DeliveryEvent::ResourceActuationLaunched {
                resource: reference,
                tasks,
            })
            .await;
            return Ok(ActuationOutcome::Created);
        }

        if diff.has_changes() {
            let delta = diff.to_delta_json();
            warn!(resource_id = %id, "Resource is invalid");
            info!(resource_id = %id, %delta, "Resource delta");
            self.record(DeliveryEvent::ResourceDeltaDetected {
                resource: reference.clone(),
                delta,
            })
            .await;
            let tasks = handler
                .update(&resolved, &diff)
                .await
                .map_err(|e| handler_failure(id, e))?;
            self.repositories.diff_fingerprints.mark_action_taken(id).await?;
            self.record(DeliveryEvent::ResourceActuationLaunched {
                resource: reference,
                tasks,
            })
            .await;
            return Ok(ActuationOutcome::Updated);
        }

        info!(resource_id = %id, "Resource is valid");
        let last = self.repositories.resources.last_event(id).await?;
        if matches!(
            last,
            Some(ResourceHistoryKind::DeltaDetected | ResourceHistoryKind::ActuationLaunched)
        ) {
            self.record(DeliveryEvent::ResourceDeltaResolved { resource: reference })
                .await;
            Ok(ActuationOutcome::DeltaResolved)
        } else {
            self.record(DeliveryEvent::ResourceValid { resource: reference }).await;
            Ok(ActuationOutcome::Valid)
        }
    }

    async fn vetoed(&self, resource: &Resource, resolved: &Resource, response: VetoResponse) -> ActuationOutcome {
        if response.veto_artifact {
            self.veto_artifact(resolved, &response).await;
        }
        debug!(
            resource_id = %resource.id,
            veto = %response.veto_name,
            message = ?response.message,
            "Skipping actuation because it was vetoed"
        );
        self.skipped(resource, &response.veto_name).await;
        if response.veto_name != UNHAPPY_VETO {
            self.record(DeliveryEvent::ResourceActuationVetoed {
                resource: ResourceRef::from(resource),
                veto: response.veto_name.clone(),
                reason: response.message.clone(),
            })
            .await;
        }
        ActuationOutcome::Vetoed {
            veto: response.veto_name,
        }
    }

    /// Bars the resource's artifact version from its environment so the
    /// environment rolls back to its last good version. Failures are counted, not raised.
    async fn veto_artifact(&self, resolved: &Resource, response: &VetoResponse) {
        let (Some(reference), Some(version)) = (resolved.artifact_reference(), resolved.artifact_version()) else {
            return;
        };
        if let Err(e) = self.try_veto_artifact(resolved, reference, version, response).await {
            warn!(resource_id = %resolved.id, %version, error = %e, "Failed to veto presumed bad artifact version");
            self.artifact_veto_failures.fetch_add(1, Ordering::Relaxed);
            publish(
                self.events.as_ref(),
                &DeliveryEvent::ArtifactVetoFailed {
                    resource: ResourceRef::from(resolved),
                    version: version.to_string(),
                    error: e.to_string(),
                },
            )
            .await;
        }
    }

    async fn try_veto_artifact(
        &self,
        resolved: &Resource,
        reference: &str,
        version: &str,
        response: &VetoResponse,
    ) -> Result<()> {
        let config = self
            .repositories
            .delivery_configs
            .delivery_config_for_resource(&resolved.id)
            .await?;
        let environment = config
            .environment_of_resource(&resolved.id)
            .map(|e| e.name.clone())
            .ok_or_else(|| {
                PromoterError::internal(format!(
                    "Failed to find environment for {} in delivery config {}",
                    resolved.id, config.name
                ))
            })?;

        let veto = EnvironmentArtifactVeto::new(&environment, reference, version).by(
            response.veto_name.clone(),
            response.message.clone().unwrap_or_default(),
        );
        if self
            .repositories
            .artifacts
            .mark_as_vetoed_in(&config, &veto, false)
            .await?
        {
            info!(resource_id = %resolved.id, %environment, %version, veto = %response.veto_name, "Vetoed artifact version");
            publish(
                self.events.as_ref(),
                &DeliveryEvent::ArtifactVersionVetoed {
                    application: config.application.clone(),
                    environment,
                    reference: reference.to_string(),
                    version: version.to_string(),
                    vetoed_by: Some(response.veto_name.clone()),
                },
            )
            .await;
        }
        Ok(())
    }

    async fn skipped(&self, resource: &Resource, skipper: &str) {
        publish(
            self.events.as_ref(),
            &DeliveryEvent::ResourceCheckSkipped {
                resource: ResourceRef::from(resource),
                skipper: skipper.to_string(),
            },
        )
        .await;
    }

    async fn record(&self, event: DeliveryEvent) {
        if let Err(e) = self.repositories.resources.append_history(&event).await {
            warn!(event = event.event_type(), error = %e, "Failed to record resource history");
        }
        publish(self.events.as_ref(), &event).await;
    }
}

impl std::fmt::Debug for ResourceActuator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceActuator")
            .field("handlers", &self.handlers)
            .field("vetoes", &self.vetoes)
            .field("artifact_veto_failures", &self.artifact_veto_failures())
            .finish_non_exhaustive()
    }
}

/// Resolves desired and current state concurrently. An unresolvable signal
/// from either side wins over a failure from the other.
async fn resolve(
    resource: &Resource,
    handler: &dyn ResourceHandler,
) -> Result<(DesiredState, Option<serde_json::Value>)> {
    let id = resource.id.as_str();
    let (desired, current) = futures::join!(handler.desired(resource), handler.current(resource));

    let desired = desired.map_err(|e| match e {
        HandlerError::CurrentlyUnresolvable(message) => unresolvable(id, message),
        HandlerError::Failed(source) => ResolutionError::CannotResolveDesiredState {
            resource_id: id.to_string(),
            source,
        }
        .into(),
    });
    let current = current.map_err(|e| match e {
        HandlerError::CurrentlyUnresolvable(message) => unresolvable(id, message),
        HandlerError::Failed(source) => ResolutionError::CannotResolveCurrentState {
            resource_id: id.to_string(),
            source,
        }
        .into(),
    });

    match (desired, current) {
        (Ok(desired), Ok(current)) => Ok((desired, current)),
        (Err(e @ PromoterError::CurrentlyUnresolvable { .. }), _)
        | (_, Err(e @ PromoterError::CurrentlyUnresolvable { .. }))
        | (Err(e), _)
        | (_, Err(e)) => Err(e),
    }
}

fn unresolvable(resource_id: &str, message: String) -> PromoterError {
    PromoterError::CurrentlyUnresolvable {
        resource_id: resource_id.to_string(),
        message,
    }
}

fn handler_failure(resource_id: &str, e: HandlerError) -> PromoterError {
    match e {
        HandlerError::CurrentlyUnresolvable(message) => unresolvable(resource_id, message),
        HandlerError::Failed(source) => PromoterError::Handler(source),
    }
}
