//! Pausing and resuming actuation.

use crate::core::{DeliveryEvent, Resource, ResourceRef};
use crate::errors::Result;
use crate::events::{publish, EventSink};
use crate::persistence::{PausedRepository, ResourceRepository};
use std::sync::Arc;
use tracing::info;

/// Why a resource is paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseScope {
    /// The whole application is paused.
    Application,
    /// Only this resource is paused.
    Resource,
}

/// Pauses and resumes actuation for applications and single resources.
#[derive(Clone)]
pub struct ActuationPauser {
    resources: Arc<dyn ResourceRepository>,
    paused: Arc<dyn PausedRepository>,
    events: Arc<dyn EventSink>,
}

impl ActuationPauser {
    /// Creates a pauser.
    #[must_use]
    pub fn new(
        resources: Arc<dyn ResourceRepository>,
        paused: Arc<dyn PausedRepository>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            resources,
            paused,
            events,
        }
    }

    /// Returns true if the resource or its application is paused.
    pub async fn is_paused(&self, resource: &Resource) -> Result<bool> {
        Ok(self.pause_scope(resource).await?.is_some())
    }

    /// The scope pausing the resource; the application wins over the resource.
    pub async fn pause_scope(&self, resource: &Resource) -> Result<Option<PauseScope>> {
        if self.paused.is_application_paused(resource.application()).await? {
            return Ok(Some(PauseScope::Application));
        }
        if self.paused.is_resource_paused(&resource.id).await? {
            return Ok(Some(PauseScope::Resource));
        }
        Ok(None)
    }

    /// Pauses an application.
    pub async fn pause_application(&self, application: &str) -> Result<()> {
        info!(application, "Pausing application");
        self.paused.pause_application(application).await?;
        publish(
            self.events.as_ref(),
            &DeliveryEvent::ApplicationActuationPaused {
                application: application.to_string(),
            },
        )
        .await;
        Ok(())
    }

    /// Resumes an application, publishing a resumed event for each of its
    /// resources so their status does not look stale.
    pub async fn resume_application(&self, application: &str) -> Result<()> {
        info!(application, "Resuming application");
        self.paused.resume_application(application).await?;
        publish(
            self.events.as_ref(),
            &DeliveryEvent::ApplicationActuationResumed {
                application: application.to_string(),
            },
        )
        .await;
        for resource in self.resources.get_by_application(application).await? {
            self.record(DeliveryEvent::ResourceActuationResumed {
                resource: ResourceRef::from(&resource),
            })
            .await?;
        }
        Ok(())
    }

    /// Pauses one resource.
    pub async fn pause_resource(&self, id: &str) -> Result<()> {
        info!(resource_id = id, "Pausing resource");
        let resource = self.resources.get(id).await?;
        self.paused.pause_resource(id).await?;
        self.record(DeliveryEvent::ResourceActuationPaused {
            resource: ResourceRef::from(&resource),
        })
        .await
    }

    /// Resumes one resource.
    pub async fn resume_resource(&self, id: &str) -> Result<()> {
        info!(resource_id = id, "Resuming resource");
        let resource = self.resources.get(id).await?;
        self.paused.resume_resource(id).await?;
        self.record(DeliveryEvent::ResourceActuationResumed {
            resource: ResourceRef::from(&resource),
        })
        .await
    }

    /// Paused applications, sorted.
    pub async fn paused_applications(&self) -> Result<Vec<String>> {
        self.paused.paused_applications().await
    }

    async fn record(&self, event: DeliveryEvent) -> Result<()> {
        self.resources.append_history(&event).await?;
        publish(self.events.as_ref(), &event).await;
        Ok(())
    }
}

impl std::fmt::Debug for ActuationPauser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActuationPauser").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ResourceHistoryKind;
    use crate::events::CollectingEventSink;
    use crate::persistence::{InMemoryPausedRepository, InMemoryResourceRepository};
    use crate::testing::fixtures;

    async fn pauser() -> (ActuationPauser, Arc<InMemoryResourceRepository>, Arc<CollectingEventSink>) {
        let resources = Arc::new(InMemoryResourceRepository::new());
        for env in ["test", "staging"] {
            resources.store(&fixtures::resource(env)).await.unwrap();
        }
        let events = Arc::new(CollectingEventSink::new());
        let pauser = ActuationPauser::new(
            resources.clone(),
            Arc::new(InMemoryPausedRepository::new()),
            events.clone(),
        );
        (pauser, resources, events)
    }

    #[tokio::test]
    async fn test_application_pause_covers_resources() {
        let (pauser, _, events) = pauser().await;
        let resource = fixtures::resource("test");
        assert!(!pauser.is_paused(&resource).await.unwrap());

        pauser.pause_application(fixtures::APPLICATION).await.unwrap();
        assert_eq!(pauser.pause_scope(&resource).await.unwrap(), Some(PauseScope::Application));
        assert_eq!(pauser.paused_applications().await.unwrap(), vec![fixtures::APPLICATION]);

        pauser.resume_application(fixtures::APPLICATION).await.unwrap();
        assert!(!pauser.is_paused(&resource).await.unwrap());
        assert_eq!(events.count_of("application.actuation_paused"), 1);
        assert_eq!(events.count_of("application.actuation_resumed"), 1);
        assert_eq!(events.count_of("resource.actuation_resumed"), 2);
    }

    #[tokio::test]
    async fn test_resource_pause_is_recorded_in_history() {
        let (pauser, resources, events) = pauser().await;
        let id = fixtures::resource_id("test");

        pauser.pause_resource(&id).await.unwrap();
        assert_eq!(
            pauser.pause_scope(&fixtures::resource("test")).await.unwrap(),
            Some(PauseScope::Resource)
        );
        assert!(!pauser.is_paused(&fixtures::resource("staging")).await.unwrap());
        assert_eq!(
            resources.last_event(&id).await.unwrap(),
            Some(ResourceHistoryKind::ActuationPaused)
        );

        pauser.resume_resource(&id).await.unwrap();
        assert_eq!(
            resources.last_event(&id).await.unwrap(),
            Some(ResourceHistoryKind::ActuationResumed)
        );
        assert_eq!(events.count_of("resource.actuation_paused"), 1);
    }

    #[tokio::test]
    async fn test_pausing_unknown_resource_fails() {
        let (pauser, _, _) = pauser().await;
        assert!(pauser.pause_resource("nope").await.is_err());
    }
}
