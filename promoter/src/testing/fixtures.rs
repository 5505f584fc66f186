//! Canned delivery configs, artifacts and resources.
//!
//! Everything here describes the same small application, `keeldemo`, deployed
//! through `test`, `staging` and `production`.

use crate::core::{
    Constraint, DeliveryArtifact, DeliveryConfig, Environment, PublishedArtifact, Resource,
    SubmittedDeliveryConfig, SubmittedEnvironment, SubmittedResource, TagVersionStrategy,
    Verification, ArtifactType, APPLICATION_KEY, SERVICE_ACCOUNT_KEY,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Name of the fixture delivery config.
pub const CONFIG_NAME: &str = "keeldemo-manifest";
/// Owning application.
pub const APPLICATION: &str = "keeldemo";
/// Service account.
pub const SERVICE_ACCOUNT: &str = "keel@spinnaker.io";
/// Reference of the debian artifact.
pub const DEB_REFERENCE: &str = "keeldemo-deb";
/// Kind of every fixture resource.
pub const CLUSTER_KIND: &str = "ec2/cluster@v1";

/// The debian artifact, stamped with the fixture config.
#[must_use]
pub fn keeldemo_deb() -> DeliveryArtifact {
    DeliveryArtifact::debian(APPLICATION, DEB_REFERENCE).with_delivery_config(CONFIG_NAME)
}

/// A docker artifact using `strategy`, stamped with the fixture config.
#[must_use]
pub fn docker_artifact(strategy: TagVersionStrategy) -> DeliveryArtifact {
    DeliveryArtifact::docker("spkr/keeldemo", "keeldemo-docker", strategy).with_delivery_config(CONFIG_NAME)
}

/// A bare debian version.
#[must_use]
pub fn deb_version(version: &str) -> PublishedArtifact {
    PublishedArtifact::new(APPLICATION, ArtifactType::Deb, version)
}

/// A bare docker tag.
#[must_use]
pub fn docker_version(name: &str, tag: &str) -> PublishedArtifact {
    PublishedArtifact::new(name, ArtifactType::Docker, tag)
}

/// Id of the cluster in `environment`.
#[must_use]
pub fn resource_id(environment: &str) -> String {
    format!("ec2:cluster:{environment}:keeldemo")
}

fn cluster_spec() -> Value {
    json!({
        "artifactReference": DEB_REFERENCE,
        "capacity": {"min": 1, "max": 2},
        "region": "us-west-2",
    })
}

/// The cluster deployed to `environment`.
#[must_use]
pub fn resource(environment: &str) -> Resource {
    Resource::new(resource_id(environment), CLUSTER_KIND, cluster_spec())
        .with_metadata(APPLICATION_KEY, APPLICATION)
        .with_metadata(SERVICE_ACCOUNT_KEY, SERVICE_ACCOUNT)
}

/// `test` → `staging` → `production`, with a manual judgement on production.
#[must_use]
pub fn delivery_config() -> DeliveryConfig {
    DeliveryConfig {
        name: CONFIG_NAME.to_string(),
        application: APPLICATION.to_string(),
        service_account: SERVICE_ACCOUNT.to_string(),
        artifacts: vec![keeldemo_deb()],
        environments: vec![
            Environment::new("test").with_resource(resource("test")),
            Environment::new("staging")
                .with_resource(resource("staging"))
                .with_constraint(Constraint::DependsOn {
                    environment: "test".to_string(),
                }),
            Environment::new("production")
                .with_resource(resource("production"))
                .with_constraint(Constraint::DependsOn {
                    environment: "staging".to_string(),
                })
                .with_constraint(Constraint::ManualJudgement {
                    timeout_seconds: 3600,
                }),
        ],
    }
}

/// [`delivery_config`] with a `smoke` verification on `test`.
#[must_use]
pub fn delivery_config_with_verification() -> DeliveryConfig {
    let mut config = delivery_config();
    if let Some(test) = config.environments.iter_mut().find(|e| e.name == "test") {
        test.verify_with.push(Verification {
            id: "smoke".to_string(),
            verification_type: "test-container".to_string(),
            config: json!({"image": "keeldemo/smoke-tests:latest"}),
        });
    }
    config
}

/// The user-submitted form of [`delivery_config`].
#[must_use]
pub fn submitted_delivery_config() -> SubmittedDeliveryConfig {
    let config = delivery_config();
    SubmittedDeliveryConfig {
        name: config.name,
        application: config.application,
        service_account: config.service_account,
        artifacts: vec![DeliveryArtifact::debian(APPLICATION, DEB_REFERENCE)],
        environments: config
            .environments
            .into_iter()
            .map(|environment| SubmittedEnvironment {
                name: environment.name.clone(),
                resources: vec![SubmittedResource {
                    id: resource_id(&environment.name),
                    kind: CLUSTER_KIND.to_string(),
                    metadata: BTreeMap::new(),
                    spec: cluster_spec(),
                }],
                constraints: environment.constraints,
                verify_with: environment.verify_with,
                notifications: environment.notifications,
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_config_is_consistent() {
        let config = delivery_config();
        assert_eq!(config.resources().count(), 3);
        assert!(config.resources().all(|r| r.artifact_reference() == Some(DEB_REFERENCE)));
        assert!(config.artifact(DEB_REFERENCE).is_some());
        assert_eq!(submitted_delivery_config().environments.len(), 3);
    }
}
