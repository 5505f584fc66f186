//! Domain events emitted by the engine.

use super::resource::Resource;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifies the resource an event is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    /// Resource id.
    pub id: String,
    /// Kind tag.
    pub kind: String,
    /// Owning application.
    pub application: String,
    /// Resource version at the time of the event.
    pub version: u64,
}

impl From<&Resource> for ResourceRef {
    fn from(resource: &Resource) -> Self {
        Self {
            id: resource.id.clone(),
            kind: resource.kind.to_string(),
            application: resource.application().to_string(),
            version: resource.version,
        }
    }
}

/// The subset of resource events kept in a resource's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceHistoryKind {
    /// First persisted.
    Created,
    /// Spec changed.
    Updated,
    /// Current state absent.
    Missing,
    /// Current state differs from desired.
    DeltaDetected,
    /// A previously detected delta is gone.
    DeltaResolved,
    /// A handler launched corrective tasks.
    ActuationLaunched,
    /// Current state matches desired.
    Valid,
    /// Blocked by a veto.
    ActuationVetoed,
    /// The check failed.
    CheckError,
    /// Dependencies not ready.
    CheckUnresolvable,
    /// Paused by a user.
    ActuationPaused,
    /// Resumed by a user.
    ActuationResumed,
}

/// A task launched by a resource handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchedTask {
    /// External task id.
    pub id: String,
    /// Human-readable name.
    pub name: String,
}

/// Every event the engine publishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DeliveryEvent {
    /// A resource was persisted for the first time.
    ResourceCreated {
        /// The resource.
        resource: ResourceRef,
    },
    /// A resource's spec changed.
    ResourceUpdated {
        /// The resource.
        resource: ResourceRef,
        /// The spec delta.
        delta: Value,
    },
    /// A resource's current state is absent.
    ResourceMissing {
        /// The resource.
        resource: ResourceRef,
    },
    /// A resource's current state differs from desired.
    ResourceDeltaDetected {
        /// The resource.
        resource: ResourceRef,
        /// The delta.
        delta: Value,
    },
    /// A resource's previously detected delta is gone.
    ResourceDeltaResolved {
        /// The resource.
        resource: ResourceRef,
    },
    /// A resource's current state matches desired.
    ResourceValid {
        /// The resource.
        resource: ResourceRef,
    },
    /// A handler launched corrective tasks.
    ResourceActuationLaunched {
        /// The resource.
        resource: ResourceRef,
        /// Launched tasks.
        tasks: Vec<LaunchedTask>,
    },
    /// A veto blocked actuation.
    ResourceActuationVetoed {
        /// The resource.
        resource: ResourceRef,
        /// The veto.
        veto: String,
        /// The veto's message.
        reason: Option<String>,
    },
    /// A check was skipped.
    ResourceCheckSkipped {
        /// The resource.
        resource: ResourceRef,
        /// What caused the skip.
        skipper: String,
    },
    /// A check failed.
    ResourceCheckError {
        /// The resource.
        resource: ResourceRef,
        /// The error.
        error: String,
    },
    /// A resource's dependencies are not ready.
    ResourceCheckUnresolvable {
        /// The resource.
        resource: ResourceRef,
        /// Why.
        message: String,
    },
    /// Loading resources due for check failed.
    ResourceLoadFailed {
        /// The error.
        error: String,
    },
    /// A resource check finished.
    ResourceCheckCompleted {
        /// Time since the tick started.
        duration_ms: u64,
    },
    /// A resource check exceeded its deadline.
    ResourceCheckTimedOut {
        /// The resource.
        resource: ResourceRef,
    },
    /// A resource was paused.
    ResourceActuationPaused {
        /// The resource.
        resource: ResourceRef,
    },
    /// A resource was resumed.
    ResourceActuationResumed {
        /// The resource.
        resource: ResourceRef,
    },
    /// An application was paused.
    ApplicationActuationPaused {
        /// The application.
        application: String,
    },
    /// An application was resumed.
    ApplicationActuationResumed {
        /// The application.
        application: String,
    },
    /// Checking a delivery config's environments exceeded its deadline.
    EnvironmentsCheckTimedOut {
        /// The application.
        application: String,
        /// The delivery config.
        delivery_config: String,
    },
    /// A version was approved for an environment.
    ArtifactVersionApproved {
        /// The application.
        application: String,
        /// The delivery config.
        delivery_config: String,
        /// The environment.
        environment: String,
        /// The artifact reference.
        reference: String,
        /// The version.
        version: String,
    },
    /// A version was vetoed from an environment.
    ArtifactVersionVetoed {
        /// The application.
        application: String,
        /// The environment.
        environment: String,
        /// The artifact reference.
        reference: String,
        /// The version.
        version: String,
        /// Who vetoed it.
        vetoed_by: Option<String>,
    },
    /// Vetoing a version on behalf of a resource veto failed.
    ArtifactVetoFailed {
        /// The resource whose veto requested it.
        resource: ResourceRef,
        /// The version.
        version: String,
        /// The error.
        error: String,
    },
    /// An artifact was registered.
    ArtifactRegistered {
        /// Artifact name.
        name: String,
        /// Artifact type.
        artifact_type: String,
        /// Artifact reference.
        reference: String,
    },
    /// A new version of an artifact was recorded.
    ArtifactVersionStored {
        /// Artifact name.
        name: String,
        /// The version.
        version: String,
    },
    /// Checking an artifact exceeded its deadline.
    ArtifactCheckTimedOut {
        /// Artifact name.
        name: String,
        /// The delivery config.
        delivery_config: String,
    },
    /// An artifact check batch finished.
    ArtifactCheckComplete {
        /// Batch duration.
        duration_ms: u64,
    },
    /// A stateful constraint's judgement changed.
    ConstraintStateChanged {
        /// The environment.
        environment: String,
        /// Constraint type.
        constraint_type: String,
        /// The version.
        version: String,
        /// Previous status, if a state existed.
        previous_status: Option<String>,
        /// New status.
        status: String,
    },
    /// A verification exceeded its deadline.
    VerificationTimedOut {
        /// The application.
        application: String,
        /// The environment.
        environment: String,
        /// The version.
        version: String,
    },
    /// A verification batch finished.
    VerificationCheckComplete {
        /// Batch duration.
        duration_ms: u64,
    },
    /// A scheduled agent finished.
    AgentInvocationComplete {
        /// Duration.
        duration_ms: u64,
        /// The agent.
        agent: String,
    },
}

impl DeliveryEvent {
    /// The dotted event type used by event sinks, e.g. `resource.delta_detected`.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ResourceCreated { .. } => "resource.created",
            Self::ResourceUpdated { .. } => "resource.updated",
            Self::ResourceMissing { .. } => "resource.missing",
            Self::ResourceDeltaDetected { .. } => "resource.delta_detected",
            Self::ResourceDeltaResolved { .. } => "resource.delta_resolved",
            Self::ResourceValid { .. } => "resource.valid",
            Self::ResourceActuationLaunched { .. } => "resource.actuation_launched",
            Self::ResourceActuationVetoed { .. } => "resource.actuation_vetoed",
            Self::ResourceCheckSkipped { .. } => "resource.check_skipped",
            Self::ResourceCheckError { .. } => "resource.check_error",
            Self::ResourceCheckUnresolvable { .. } => "resource.check_unresolvable",
            Self::ResourceLoadFailed { .. } => "resource.load_failed",
            Self::ResourceCheckCompleted { .. } => "resource.check_completed",
            Self::ResourceCheckTimedOut { .. } => "resource.check_timed_out",
            Self::ResourceActuationPaused { .. } => "resource.actuation_paused",
            Self::ResourceActuationResumed { .. } => "resource.actuation_resumed",
            Self::ApplicationActuationPaused { .. } => "application.actuation_paused",
            Self::ApplicationActuationResumed { .. } => "application.actuation_resumed",
            Self::EnvironmentsCheckTimedOut { .. } => "environment.check_timed_out",
            Self::ArtifactVersionApproved { .. } => "artifact.version_approved",
            Self::ArtifactVersionVetoed { .. } => "artifact.version_vetoed",
            Self::ArtifactVetoFailed { .. } => "artifact.veto_failed",
            Self::ArtifactRegistered { .. } => "artifact.registered",
            Self::ArtifactVersionStored { .. } => "artifact.version_stored",
            Self::ArtifactCheckTimedOut { .. } => "artifact.check_timed_out",
            Self::ArtifactCheckComplete { .. } => "artifact.check_complete",
            Self::ConstraintStateChanged { .. } => "constraint.state_changed",
            Self::VerificationTimedOut { .. } => "verification.timed_out",
            Self::VerificationCheckComplete { .. } => "verification.check_complete",
            Self::AgentInvocationComplete { .. } => "agent.invocation_complete",
        }
    }

    /// The resource id and history kind, for events kept in resource history.
    #[must_use]
    pub fn history_entry(&self) -> Option<(&str, ResourceHistoryKind)> {
        let (resource, kind) = match self {
            Self::ResourceCreated { resource } => (resource, ResourceHistoryKind::Created),
            Self::ResourceUpdated { resource, .. } => (resource, ResourceHistoryKind::Updated),
            Self::ResourceMissing { resource } => (resource, ResourceHistoryKind::Missing),
            Self::ResourceDeltaDetected { resource, .. } => (resource, ResourceHistoryKind::DeltaDetected),
            Self::ResourceDeltaResolved { resource } => (resource, ResourceHistoryKind::DeltaResolved),
            Self::ResourceValid { resource } => (resource, ResourceHistoryKind::Valid),
            Self::ResourceActuationLaunched { resource, .. } => {
                (resource, ResourceHistoryKind::ActuationLaunched)
            }
            Self::ResourceActuationVetoed { resource, .. } => (resource, ResourceHistoryKind::ActuationVetoed),
            Self::ResourceCheckError { resource, .. } => (resource, ResourceHistoryKind::CheckError),
            Self::ResourceCheckUnresolvable { resource, .. } => {
                (resource, ResourceHistoryKind::CheckUnresolvable)
            }
            Self::ResourceActuationPaused { resource } => (resource, ResourceHistoryKind::ActuationPaused),
            Self::ResourceActuationResumed { resource } => (resource, ResourceHistoryKind::ActuationResumed),
            _ => return None,
        };
        Some((resource.id.as_str(), kind))
    }

    /// The JSON payload handed to event sinks.
    #[must_use]
    pub fn to_data(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
