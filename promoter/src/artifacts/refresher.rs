use super::{ArtifactHandler, ArtifactSupplier};
use crate::core::{DeliveryArtifact, DeliveryEvent};
use crate::errors::{PromoterError, Result};
use crate::events::{publish, EventSink};
use crate::persistence::ArtifactRepository;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Stores the latest published version of an artifact if it is unknown.
pub struct VersionRefresher {
    artifacts: Arc<dyn ArtifactRepository>,
    suppliers: Vec<Arc<dyn ArtifactSupplier>>,
    events: Arc<dyn EventSink>,
}

impl VersionRefresher {
    /// Creates a refresher over the given suppliers.
    #[must_use]
    pub fn new(
        artifacts: Arc<dyn ArtifactRepository>,
        suppliers: Vec<Arc<dyn ArtifactSupplier>>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            artifacts,
            suppliers,
            events,
        }
    }
}

#[async_trait]
impl ArtifactHandler for VersionRefresher {
    fn name(&self) -> &str {
        "VersionRefresher"
    }

    async fn handle(&self, artifact: &DeliveryArtifact) -> Result<()> {
        let Some(supplier) = self
            .suppliers
            .iter()
            .find(|s| s.supported_type() == artifact.artifact_type)
        else {
            warn!(artifact = %artifact.name, artifact_type = %artifact.artifact_type, "No artifact supplier for type");
            return Ok(());
        };

        let latest = supplier
            .latest_artifact(artifact)
            .await
            .map_err(PromoterError::Handler)?;
        let Some(latest) = latest else {
            debug!(artifact = %artifact.name, "Supplier knows no versions");
            return Ok(());
        };

        if self.artifacts.store_version(&latest).await? {
            info!(artifact = %artifact.name, version = %latest.version, "Stored missed artifact version");
            publish(
                self.events.as_ref(),
                &DeliveryEvent::ArtifactVersionStored {
                    name: latest.name.clone(),
                    version: latest.version.clone(),
                },
            )
            .await;
        }
        Ok(())
    }
}

impl std::fmt::Debug for VersionRefresher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionRefresher")
            .field("suppliers", &self.suppliers.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::MockArtifactSupplier;
    use crate::core::ArtifactType;
    use crate::events::CollectingEventSink;
    use crate::persistence::InMemoryArtifactRepository;
    use crate::testing::fixtures;
    use pretty_assertions::assert_eq;

    const V1: &str = "keeldemo-1.0.1-h1.a1b2c3d";

    fn supplier_returning(version: Option<&'static str>) -> MockArtifactSupplier {
        let mut supplier = MockArtifactSupplier::new();
        supplier.expect_supported_type().return_const(ArtifactType::Deb);
        supplier
            .expect_latest_artifact()
            .returning(move |_| Ok(version.map(fixtures::deb_version)));
        supplier
    }

    async fn refresher(supplier: MockArtifactSupplier) -> (VersionRefresher, Arc<InMemoryArtifactRepository>, Arc<CollectingEventSink>) {
        let artifacts = Arc::new(InMemoryArtifactRepository::new());
        artifacts.register(&fixtures::keeldemo_deb()).await.unwrap();
        let events = Arc::new(CollectingEventSink::new());
        let refresher = VersionRefresher::new(artifacts.clone(), vec![Arc::new(supplier)], events.clone());
        (refresher, artifacts, events)
    }

    #[tokio::test]
    async fn test_stores_unknown_latest_version_once() {
        let (refresher, artifacts, events) = refresher(supplier_returning(Some(V1))).await;

        refresher.handle(&fixtures::keeldemo_deb()).await.unwrap();
        refresher.handle(&fixtures::keeldemo_deb()).await.unwrap();

        assert_eq!(artifacts.versions(&fixtures::keeldemo_deb()).await.unwrap(), vec![V1.to_string()]);
        assert_eq!(events.count_of("artifact.version_stored"), 1);
    }

    #[tokio::test]
    async fn test_empty_supplier_stores_nothing() {
        let (refresher, artifacts, events) = refresher(supplier_returning(None)).await;
        refresher.handle(&fixtures::keeldemo_deb()).await.unwrap();
        assert!(artifacts.versions(&fixtures::keeldemo_deb()).await.unwrap().is_empty());
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_supplier_failure_is_a_handler_error() {
        let mut supplier = MockArtifactSupplier::new();
        supplier.expect_supported_type().return_const(ArtifactType::Deb);
        supplier
            .expect_latest_artifact()
            .returning(|_| Err(anyhow::anyhow!("artifact source unavailable")));
        let (refresher, _, _) = refresher(supplier).await;

        let err = refresher.handle(&fixtures::keeldemo_deb()).await.unwrap_err();
        assert!(matches!(err, PromoterError::Handler(_)));
    }

    #[tokio::test]
    async fn test_artifact_without_supplier_is_skipped() {
        let mut supplier = MockArtifactSupplier::new();
        supplier.expect_supported_type().return_const(ArtifactType::Docker);
        supplier.expect_latest_artifact().never();
        let (refresher, _, _) = refresher(supplier).await;

        refresher.handle(&fixtures::keeldemo_deb()).await.unwrap();
    }
}
