//! Storage contracts for the engine.
//!
//! Every repository is an `async_trait` so a relational backend can sit
//! behind it. The [`memory`] module provides in-process implementations
//! that honour the same contracts; they back the tests and single-process
//! deployments.
//!
//! Promotion-state writes for one (environment, artifact) pair must be
//! atomic. Implementations may serialize them however they like, but a
//! read-then-write race that leaves two `CURRENT` rows is a bug.

pub mod memory;

use crate::core::{
    ArtifactSummaryInEnvironment, ArtifactType, ConstraintState, DeliveryArtifact, DeliveryConfig,
    DeliveryEvent, EnvironmentArtifactPin, EnvironmentArtifactVeto, EnvironmentArtifactVetoes,
    EnvironmentSummary, PublishedArtifact, Resource, ResourceDiff, ResourceHistoryKind,
    VerificationStatus,
};
use crate::errors::Result;
use crate::utils::{Clock, Timestamp};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub use memory::{
    InMemoryAgentLockRepository, InMemoryArtifactRepository, InMemoryDeliveryConfigRepository,
    InMemoryDiffFingerprintRepository, InMemoryPausedRepository, InMemoryResourceRepository,
    InMemoryUnhappyVetoRepository,
};

/// Registered artifacts, their versions and their promotion state per environment.
#[async_trait]
pub trait ArtifactRepository: Send + Sync {
    /// Upserts an artifact by (name, type, delivery config, reference).
    async fn register(&self, artifact: &DeliveryArtifact) -> Result<()>;

    /// Looks up an artifact by its full identity.
    async fn get(
        &self,
        name: &str,
        artifact_type: ArtifactType,
        delivery_config_name: &str,
        reference: &str,
    ) -> Result<DeliveryArtifact>;

    /// Looks up an artifact by its reference within a delivery config.
    async fn get_by_reference(&self, delivery_config_name: &str, reference: &str) -> Result<DeliveryArtifact>;

    /// Every registered artifact.
    async fn get_all(&self) -> Result<Vec<DeliveryArtifact>>;

    /// Returns true if any artifact with the name and type is registered.
    async fn is_registered(&self, name: &str, artifact_type: ArtifactType) -> Result<bool>;

    /// Removes an artifact and its promotion state.
    async fn delete(&self, artifact: &DeliveryArtifact) -> Result<()>;

    /// Records a version. Returns false if it was already known.
    async fn store_version(&self, version: &PublishedArtifact) -> Result<bool>;

    /// A stored version with its metadata.
    async fn get_artifact_version(
        &self,
        artifact: &DeliveryArtifact,
        version: &str,
    ) -> Result<Option<PublishedArtifact>>;

    /// Known versions passing the artifact's filters, newest first.
    async fn versions(&self, artifact: &DeliveryArtifact) -> Result<Vec<String>>;

    /// Approves a version for an environment. Returns true if the approval is new.
    async fn approve_version_for(
        &self,
        config: &DeliveryConfig,
        artifact: &DeliveryArtifact,
        version: &str,
        environment: &str,
    ) -> Result<bool>;

    /// Returns true if the version has been approved for the environment.
    async fn is_approved_for(
        &self,
        config: &DeliveryConfig,
        artifact: &DeliveryArtifact,
        version: &str,
        environment: &str,
    ) -> Result<bool>;

    /// Marks a version as deploying, skipping any other deploying version.
    async fn mark_as_deploying_to(
        &self,
        config: &DeliveryConfig,
        artifact: &DeliveryArtifact,
        version: &str,
        environment: &str,
    ) -> Result<()>;

    /// Returns true if the version is or was current in the environment.
    async fn was_successfully_deployed_to(
        &self,
        config: &DeliveryConfig,
        artifact: &DeliveryArtifact,
        version: &str,
        environment: &str,
    ) -> Result<bool>;

    /// Returns true if the version is current in the environment.
    async fn is_currently_deployed_to(
        &self,
        config: &DeliveryConfig,
        artifact: &DeliveryArtifact,
        version: &str,
        environment: &str,
    ) -> Result<bool>;

    /// The current version in the environment, if any.
    async fn current_version_in(
        &self,
        config: &DeliveryConfig,
        artifact: &DeliveryArtifact,
        environment: &str,
    ) -> Result<Option<String>>;

    /// Marks a version as current. The old current becomes previous and
    /// older approved versions are skipped.
    async fn mark_as_successfully_deployed_to(
        &self,
        config: &DeliveryConfig,
        artifact: &DeliveryArtifact,
        version: &str,
        environment: &str,
    ) -> Result<()>;

    /// The pinned version if there is one, else the newest approved non-vetoed version.
    async fn latest_version_approved_in(
        &self,
        config: &DeliveryConfig,
        artifact: &DeliveryArtifact,
        environment: &str,
    ) -> Result<Option<String>>;

    /// Vetoes a version. Returns false without changing anything if the
    /// version is pinned, or if it is already a rollback target and `force`
    /// is not set.
    async fn mark_as_vetoed_in(
        &self,
        config: &DeliveryConfig,
        veto: &EnvironmentArtifactVeto,
        force: bool,
    ) -> Result<bool>;

    /// Lifts a veto, restoring the version to approved.
    async fn delete_veto(
        &self,
        config: &DeliveryConfig,
        artifact: &DeliveryArtifact,
        version: &str,
        environment: &str,
    ) -> Result<()>;

    /// Veto audit records grouped by (environment, reference).
    async fn vetoed_environment_versions(&self, config: &DeliveryConfig) -> Result<Vec<EnvironmentArtifactVetoes>>;

    /// Skips a version in favour of `superseded_by`.
    async fn mark_as_skipped(
        &self,
        config: &DeliveryConfig,
        artifact: &DeliveryArtifact,
        version: &str,
        environment: &str,
        superseded_by: &str,
    ) -> Result<()>;

    /// Buckets every known version by status, per environment and artifact.
    async fn get_environment_summaries(&self, config: &DeliveryConfig) -> Result<Vec<EnvironmentSummary>>;

    /// Pins an environment to a version and approves it there.
    async fn pin_environment(&self, config: &DeliveryConfig, pin: &EnvironmentArtifactPin) -> Result<()>;

    /// Every pin in the config.
    async fn pinned_environments(&self, config: &DeliveryConfig) -> Result<Vec<EnvironmentArtifactPin>>;

    /// Removes the pin for one artifact, or every pin in the environment.
    async fn delete_pin(&self, config: &DeliveryConfig, environment: &str, reference: Option<&str>) -> Result<()>;

    /// The state of one version in one environment.
    async fn get_artifact_summary_in_environment(
        &self,
        config: &DeliveryConfig,
        environment: &str,
        reference: &str,
        version: &str,
    ) -> Result<Option<ArtifactSummaryInEnvironment>>;

    /// Registered artifacts not checked within `min_age`, marked as checked.
    async fn artifacts_due_for_check(&self, min_age: Duration, limit: usize) -> Result<Vec<DeliveryArtifact>>;

    /// Drops every artifact, pin, veto and promotion record of a config.
    async fn delete_delivery_config_state(&self, delivery_config_name: &str) -> Result<()>;
}

/// The version and environment a verification runs against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VerificationContext {
    /// Delivery config name.
    pub delivery_config_name: String,
    /// Environment name.
    pub environment: String,
    /// Artifact reference.
    pub artifact_reference: String,
    /// The deployed version.
    pub version: String,
}

/// The stored outcome of one verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationState {
    /// Current status.
    pub status: VerificationStatus,
    /// When it was launched.
    pub started_at: Timestamp,
    /// When it finished.
    pub ended_at: Option<Timestamp>,
    /// Evaluator-specific data, e.g. launched task ids.
    pub metadata: Value,
}

/// Delivery configs and the state hanging off their environments.
#[async_trait]
pub trait DeliveryConfigRepository: Send + Sync {
    /// Upserts a config by name.
    async fn store(&self, config: &DeliveryConfig) -> Result<()>;

    /// Looks up a config by name.
    async fn get(&self, name: &str) -> Result<DeliveryConfig>;

    /// Looks up the config of an application.
    async fn get_by_application(&self, application: &str) -> Result<DeliveryConfig>;

    /// The config owning a resource.
    async fn delivery_config_for_resource(&self, resource_id: &str) -> Result<DeliveryConfig>;

    /// Deletes a config and its constraint states, queued approvals and leases.
    async fn delete_by_name(&self, name: &str) -> Result<()>;

    /// Deletes the config of an application.
    async fn delete_by_application(&self, application: &str) -> Result<()>;

    /// Upserts a constraint state keyed by (config, environment, version, type).
    async fn store_constraint_state(&self, state: &ConstraintState) -> Result<()>;

    /// Reads a constraint state.
    async fn get_constraint_state(
        &self,
        delivery_config_name: &str,
        environment: &str,
        version: &str,
        constraint_type: &str,
    ) -> Result<Option<ConstraintState>>;

    /// Versions of an artifact with at least one pending constraint state in the environment.
    async fn pending_constraint_versions(
        &self,
        delivery_config_name: &str,
        environment: &str,
        reference: &str,
    ) -> Result<Vec<String>>;

    /// Queues a version for approval.
    async fn queue_approval(
        &self,
        delivery_config_name: &str,
        reference: &str,
        version: &str,
        environment: &str,
    ) -> Result<()>;

    /// Versions queued for approval.
    async fn queued_approvals(
        &self,
        delivery_config_name: &str,
        reference: &str,
        environment: &str,
    ) -> Result<Vec<String>>;

    /// Removes a queued approval.
    async fn delete_queued_approval(
        &self,
        delivery_config_name: &str,
        reference: &str,
        version: &str,
        environment: &str,
    ) -> Result<()>;

    /// Configs whose last check is older than `min_age` and whose lease is
    /// free or stale; each returned config is leased to `owner`.
    async fn delivery_configs_due_for_check(
        &self,
        owner: &str,
        min_age: Duration,
        lease_staleness: Duration,
        limit: usize,
    ) -> Result<Vec<DeliveryConfig>>;

    /// Records a finished check and releases the lease, provided `owner`
    /// still holds it. Returns false when the lease was reclaimed by another owner.
    async fn mark_delivery_config_check_complete(&self, owner: &str, config: &DeliveryConfig) -> Result<bool>;

    /// (config, environment) pairs with verifications whose last verification
    /// check is older than `min_age`; each is marked as checked.
    async fn environments_due_for_verification(
        &self,
        min_age: Duration,
        limit: usize,
    ) -> Result<Vec<(DeliveryConfig, String)>>;

    /// Reads a verification state.
    async fn get_verification_state(
        &self,
        context: &VerificationContext,
        verification_id: &str,
    ) -> Result<Option<VerificationState>>;

    /// Writes a verification state.
    async fn update_verification_state(
        &self,
        context: &VerificationContext,
        verification_id: &str,
        status: VerificationStatus,
        metadata: Value,
    ) -> Result<()>;
}

/// One entry in a resource's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceHistoryEntry {
    /// What happened.
    pub kind: ResourceHistoryKind,
    /// When.
    pub at: Timestamp,
    /// The full event payload.
    pub event: Value,
}

/// Persisted resources and their history.
#[async_trait]
pub trait ResourceRepository: Send + Sync {
    /// Upserts a resource by id.
    async fn store(&self, resource: &Resource) -> Result<()>;

    /// Looks up a resource.
    async fn get(&self, id: &str) -> Result<Resource>;

    /// Returns true if the resource exists.
    async fn has(&self, id: &str) -> Result<bool>;

    /// Resources of an application.
    async fn get_by_application(&self, application: &str) -> Result<Vec<Resource>>;

    /// Deletes a resource and its history.
    async fn delete(&self, id: &str) -> Result<()>;

    /// Resources not checked within `min_age`, marked as checked.
    async fn resources_due_for_check(&self, min_age: Duration, limit: usize) -> Result<Vec<Resource>>;

    /// Appends an event to its resource's history. Events without a history entry are ignored.
    async fn append_history(&self, event: &DeliveryEvent) -> Result<()>;

    /// History entries, newest first.
    async fn event_history(&self, id: &str, limit: usize) -> Result<Vec<ResourceHistoryEntry>>;

    /// The most recent history entry's kind.
    async fn last_event(&self, id: &str) -> Result<Option<ResourceHistoryKind>>;
}

/// Fingerprints of the most recent diff per resource, with a count of the
/// corrective actions taken against it.
#[async_trait]
pub trait DiffFingerprintRepository: Send + Sync {
    /// Stores the diff's fingerprint. A changed fingerprint resets the count.
    async fn store(&self, resource_id: &str, diff: &ResourceDiff) -> Result<()>;

    /// Corrective actions taken against the current fingerprint.
    async fn action_taken_count(&self, resource_id: &str) -> Result<u64>;

    /// Counts one more corrective action.
    async fn mark_action_taken(&self, resource_id: &str) -> Result<()>;

    /// Forgets a resource.
    async fn clear(&self, resource_id: &str) -> Result<()>;
}

/// A resource the unhappy veto is holding back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnhappyRecord {
    /// Resource id.
    pub resource_id: String,
    /// Owning application.
    pub application: String,
    /// When to let one check through; `None` waits until the diff changes.
    pub recheck_time: Option<Timestamp>,
}

/// Resources that keep failing to converge.
#[async_trait]
pub trait UnhappyVetoRepository: Send + Sync {
    /// Records a resource as unhappy until `recheck_time`.
    async fn mark_unhappy(&self, resource_id: &str, application: &str, recheck_time: Option<Timestamp>) -> Result<()>;

    /// Forgets a resource.
    async fn mark_happy(&self, resource_id: &str) -> Result<()>;

    /// The record for a resource.
    async fn get(&self, resource_id: &str) -> Result<Option<UnhappyRecord>>;

    /// Every record.
    async fn get_all(&self) -> Result<Vec<UnhappyRecord>>;
}

/// Applications and resources whose actuation is paused.
#[async_trait]
pub trait PausedRepository: Send + Sync {
    /// Pauses an application.
    async fn pause_application(&self, application: &str) -> Result<()>;

    /// Resumes an application.
    async fn resume_application(&self, application: &str) -> Result<()>;

    /// Returns true if the application is paused.
    async fn is_application_paused(&self, application: &str) -> Result<bool>;

    /// Pauses a resource.
    async fn pause_resource(&self, resource_id: &str) -> Result<()>;

    /// Resumes a resource.
    async fn resume_resource(&self, resource_id: &str) -> Result<()>;

    /// Returns true if the resource itself is paused.
    async fn is_resource_paused(&self, resource_id: &str) -> Result<bool>;

    /// Paused applications, sorted.
    async fn paused_applications(&self) -> Result<Vec<String>>;
}

/// Cluster-wide locks for scheduled agents.
#[async_trait]
pub trait AgentLockRepository: Send + Sync {
    /// Takes the named lock for `timeout`. Returns false if someone else holds it.
    async fn try_acquire_lock(&self, name: &str, timeout: Duration) -> Result<bool>;
}

/// Every repository the engine runs against.
#[derive(Clone)]
pub struct Repositories {
    /// Artifacts and promotion state.
    pub artifacts: Arc<dyn ArtifactRepository>,
    /// Delivery configs, constraint states and verifications.
    pub delivery_configs: Arc<dyn DeliveryConfigRepository>,
    /// Resources and their history.
    pub resources: Arc<dyn ResourceRepository>,
    /// Diff fingerprints.
    pub diff_fingerprints: Arc<dyn DiffFingerprintRepository>,
    /// Unhappy resources.
    pub unhappy: Arc<dyn UnhappyVetoRepository>,
    /// Paused applications and resources.
    pub paused: Arc<dyn PausedRepository>,
    /// Agent locks.
    pub agent_locks: Arc<dyn AgentLockRepository>,
}

impl Repositories {
    /// In-memory repositories sharing one clock.
    #[must_use]
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self {
            artifacts: Arc::new(InMemoryArtifactRepository::with_clock(clock.clone())),
            delivery_configs: Arc::new(InMemoryDeliveryConfigRepository::with_clock(clock.clone())),
            resources: Arc::new(InMemoryResourceRepository::with_clock(clock.clone())),
            diff_fingerprints: Arc::new(InMemoryDiffFingerprintRepository::new()),
            unhappy: Arc::new(InMemoryUnhappyVetoRepository::new()),
            paused: Arc::new(InMemoryPausedRepository::new()),
            agent_locks: Arc::new(InMemoryAgentLockRepository::with_clock(clock)),
        }
    }
}

impl std::fmt::Debug for Repositories {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repositories").finish_non_exhaustive()
    }
}
