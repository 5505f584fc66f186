//! Artifact collaborators driven by the artifact check.
//!
//! An [`ArtifactHandler`] is run for every artifact that comes due. The
//! built-in [`VersionRefresher`] asks an [`ArtifactSupplier`] for the latest
//! published version so versions missed while the engine was down are
//! still picked up.

mod refresher;

use crate::core::{ArtifactType, DeliveryArtifact, PublishedArtifact};
use crate::errors::Result;
use async_trait::async_trait;

pub use refresher::VersionRefresher;

/// Runs periodically for each registered artifact.
#[async_trait]
pub trait ArtifactHandler: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Handles one artifact.
    async fn handle(&self, artifact: &DeliveryArtifact) -> Result<()>;
}

/// Looks up published versions in an external artifact source.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ArtifactSupplier: Send + Sync {
    /// The artifact type this supplier knows about.
    fn supported_type(&self) -> ArtifactType;

    /// The newest published version, if the source has any.
    async fn latest_artifact(&self, artifact: &DeliveryArtifact) -> anyhow::Result<Option<PublishedArtifact>>;
}
