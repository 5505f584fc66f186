//! Turns submitted delivery configs into stored configs, resources and artifacts.

use super::validation::validate;
use crate::core::{
    DeliveryConfig, DeliveryEvent, Environment, Resource, ResourceDiff, ResourceRef,
    SubmittedDeliveryConfig, SubmittedResource, APPLICATION_KEY, SERVICE_ACCOUNT_KEY,
};
use crate::errors::{NotFoundError, PromoterError, Result, ValidationError};
use crate::events::{publish, EventSink};
use crate::persistence::Repositories;
use crate::resources::ResourceHandlerRegistry;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Validates and stores delivery configs.
///
/// An upsert is all-or-nothing from the caller's point of view: validation
/// runs before any write, and a config that did not exist before is deleted
/// again if a later write fails.
pub struct ResourcePersister {
    repositories: Repositories,
    handlers: Arc<ResourceHandlerRegistry>,
    events: Arc<dyn EventSink>,
}

impl ResourcePersister {
    /// Creates a persister.
    #[must_use]
    pub fn new(
        repositories: Repositories,
        handlers: Arc<ResourceHandlerRegistry>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            repositories,
            handlers,
            events,
        }
    }

    /// Validates and stores a submitted config, returning what was stored.
    pub async fn upsert(&self, submitted: &SubmittedDeliveryConfig) -> Result<DeliveryConfig> {
        let old = match self.repositories.delivery_configs.get(&submitted.name).await {
            Ok(config) => Some(config),
            Err(PromoterError::NotFound(NotFoundError::NoSuchDeliveryConfig { .. })) => None,
            Err(e) => return Err(e),
        };

        let new = materialize(submitted);
        validate(&new)?;
        self.ensure_single_config(&new).await?;

        match self.persist(new.clone(), old.as_ref()).await {
            Ok(stored) => Ok(stored),
            Err(e) => {
                if old.is_none() {
                    warn!(delivery_config = %new.name, error = %e, "Upsert failed; removing partially stored config");
                    if let Err(cleanup) = self.rollback(&new).await {
                        warn!(delivery_config = %new.name, error = %cleanup, "Failed to remove partially stored config");
                    }
                }
                Err(e)
            }
        }
    }

    async fn ensure_single_config(&self, config: &DeliveryConfig) -> Result<()> {
        match self
            .repositories
            .delivery_configs
            .get_by_application(&config.application)
            .await
        {
            Ok(existing) if existing.name != config.name => Err(ValidationError::TooManyDeliveryConfigs {
                application: config.application.clone(),
                existing: existing.name,
            }
            .into()),
            Ok(_) | Err(PromoterError::NotFound(NotFoundError::NoDeliveryConfigForApplication { .. })) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Writes resources, artifacts and the config. Events are held back until
    /// the config is stored so a rolled-back upsert announces nothing.
    async fn persist(&self, mut config: DeliveryConfig, old: Option<&DeliveryConfig>) -> Result<DeliveryConfig> {
        let mut pending = Vec::new();
        for environment in &mut config.environments {
            for resource in &mut environment.resources {
                let (stored, event) = self.store_resource(resource).await?;
                *resource = stored;
                pending.extend(event);
            }
        }
        for artifact in &config.artifacts {
            self.repositories.artifacts.register(artifact).await?;
            pending.push(DeliveryEvent::ArtifactRegistered {
                name: artifact.name.clone(),
                artifact_type: artifact.artifact_type.to_string(),
                reference: artifact.reference.clone(),
            });
        }
        self.repositories.delivery_configs.store(&config).await?;
        for event in pending {
            self.record(event).await;
        }

        if let Some(old) = old {
            let kept: BTreeSet<&str> = config.resources().map(|r| r.id.as_str()).collect();
            for removed in old.resources().filter(|r| !kept.contains(r.id.as_str())) {
                info!(resource_id = %removed.id, delivery_config = %config.name, "Removing resource no longer in config");
                self.delete_resource(&removed.id).await?;
            }
        }
        info!(delivery_config = %config.name, application = %config.application, "Stored delivery config");
        Ok(config)
    }

    /// Creates or updates one resource. Unchanged specs keep the stored version.
    pub async fn upsert_resource(&self, resource: &Resource) -> Result<Resource> {
        let (stored, event) = self.store_resource(resource).await?;
        if let Some(event) = event {
            self.record(event).await;
        }
        Ok(stored)
    }

    async fn store_resource(&self, resource: &Resource) -> Result<(Resource, Option<DeliveryEvent>)> {
        self.handlers.supporting(&resource.kind)?;
        let resources = &self.repositories.resources;

        if !resources.has(&resource.id).await? {
            debug!(resource_id = %resource.id, "Creating resource");
            resources.store(resource).await?;
            let created = DeliveryEvent::ResourceCreated {
                resource: ResourceRef::from(resource),
            };
            return Ok((resource.clone(), Some(created)));
        }

        let existing = resources.get(&resource.id).await?;
        let diff = ResourceDiff::new(resource.spec.clone(), Some(existing.spec.clone()));
        if !diff.has_changes() {
            return Ok((existing, None));
        }

        let updated = Resource {
            version: existing.version + 1,
            ..resource.clone()
        };
        debug!(resource_id = %updated.id, version = updated.version, "Updating resource");
        resources.store(&updated).await?;
        let event = DeliveryEvent::ResourceUpdated {
            resource: ResourceRef::from(&updated),
            delta: diff.to_delta_json(),
        };
        Ok((updated, Some(event)))
    }

    /// Deletes a config and everything hanging off it.
    pub async fn delete_delivery_config(&self, name: &str) -> Result<()> {
        let config = self.repositories.delivery_configs.get(name).await?;
        info!(delivery_config = %name, "Deleting delivery config");
        self.rollback(&config).await
    }

    /// Deletes the config of an application.
    pub async fn delete_by_application(&self, application: &str) -> Result<()> {
        let config = self.repositories.delivery_configs.get_by_application(application).await?;
        self.delete_delivery_config(&config.name).await
    }

    /// A stored resource.
    pub async fn get(&self, id: &str) -> Result<Resource> {
        self.repositories.resources.get(id).await
    }

    /// The stored version of a resource.
    pub async fn resource_version(&self, id: &str) -> Result<u64> {
        Ok(self.get(id).await?.version)
    }

    async fn rollback(&self, config: &DeliveryConfig) -> Result<()> {
        for resource in config.resources() {
            if self.repositories.resources.has(&resource.id).await? {
                self.delete_resource(&resource.id).await?;
            }
        }
        self.repositories
            .artifacts
            .delete_delivery_config_state(&config.name)
            .await?;
        match self.repositories.delivery_configs.delete_by_name(&config.name).await {
            Ok(()) | Err(PromoterError::NotFound(NotFoundError::NoSuchDeliveryConfig { .. })) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn delete_resource(&self, id: &str) -> Result<()> {
        self.repositories.resources.delete(id).await?;
        self.repositories.diff_fingerprints.clear(id).await?;
        self.repositories.unhappy.mark_happy(id).await
    }

    async fn record(&self, event: DeliveryEvent) {
        if let Err(e) = self.repositories.resources.append_history(&event).await {
            warn!(event = event.event_type(), error = %e, "Failed to record resource history");
        }
        publish(self.events.as_ref(), &event).await;
    }
}

impl std::fmt::Debug for ResourcePersister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourcePersister")
            .field("handlers", &self.handlers)
            .finish_non_exhaustive()
    }
}

/// Builds the stored form of a submitted config: artifacts are stamped with
/// the config name and resources carry the application and service account.
fn materialize(submitted: &SubmittedDeliveryConfig) -> DeliveryConfig {
    DeliveryConfig {
        name: submitted.name.clone(),
        application: submitted.application.clone(),
        service_account: submitted.service_account.clone(),
        artifacts: submitted
            .artifacts
            .iter()
            .map(|artifact| artifact.clone().with_delivery_config(&submitted.name))
            .collect(),
        environments: submitted
            .environments
            .iter()
            .map(|env| Environment {
                name: env.name.clone(),
                resources: env.resources.iter().map(|r| to_resource(submitted, r)).collect(),
                constraints: env.constraints.clone(),
                verify_with: env.verify_with.clone(),
                notifications: env.notifications.clone(),
            })
            .collect(),
    }
}

fn to_resource(config: &SubmittedDeliveryConfig, submitted: &SubmittedResource) -> Resource {
    let mut resource = Resource::new(&submitted.id, submitted.kind.as_str(), submitted.spec.clone());
    resource.metadata.insert(
        SERVICE_ACCOUNT_KEY.to_string(),
        Value::String(config.service_account.clone()),
    );
    resource.metadata.extend(submitted.metadata.clone());
    resource.metadata.insert(
        APPLICATION_KEY.to_string(),
        Value::String(config.application.clone()),
    );
    resource
}
