//! Core domain model types.
//!
//! This module contains the fundamental types used throughout the engine:
//! - Delivery artifacts, published versions and their ordering strategies
//! - Delivery configs, environments, constraints and resources
//! - Promotion/constraint statuses, pins, vetoes and summaries
//! - Resource diffs and domain events

mod artifact;
mod delivery;
mod diff;
mod event;
mod promotion;
mod resource;
mod status;
mod versioning;

pub use artifact::{
    ArtifactOriginFilter, ArtifactStatus, ArtifactType, BranchFilter, BuildMetadata,
    DeliveryArtifact, GitMetadata, PublishedArtifact,
};
pub use delivery::{
    judgement_timeout, Constraint, DeliveryConfig, Environment, NotificationConfig,
    SubmittedDeliveryConfig, SubmittedEnvironment, SubmittedResource, Verification, DEPENDS_ON,
    MANUAL_JUDGEMENT,
};
pub use diff::{ChangeKind, DeltaEntry, ResourceDiff};
pub use event::{DeliveryEvent, LaunchedTask, ResourceHistoryKind, ResourceRef};
pub use promotion::{
    ActionMetadata, ArtifactSummaryInEnvironment, ArtifactVersionStatus, ArtifactVersions,
    ConstraintState, EnvironmentArtifactPin, EnvironmentArtifactVeto, EnvironmentArtifactVetoes,
    EnvironmentSummary,
};
pub use resource::{
    Resource, ResourceKind, APPLICATION_KEY, ARTIFACT_REFERENCE_KEY, ARTIFACT_VERSION_KEY,
    SERVICE_ACCOUNT_KEY,
};
pub use status::{ConstraintStatus, PromotionStatus, VerificationStatus};
pub use versioning::{NetflixVersion, SortType, TagVersionStrategy, VersionSorter, VersioningStrategy};
