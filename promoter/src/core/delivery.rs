//! Delivery configs, environments and constraints.

use super::artifact::DeliveryArtifact;
use super::resource::Resource;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Constraint type tag for [`Constraint::DependsOn`].
pub const DEPENDS_ON: &str = "depends-on";
/// Constraint type tag for [`Constraint::ManualJudgement`].
pub const MANUAL_JUDGEMENT: &str = "manual-judgement";

fn default_judgement_timeout() -> u64 {
    7 * 24 * 60 * 60
}

/// A gate on promotion into an environment, declared by the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Constraint {
    /// The version must have been deployed to another environment first.
    DependsOn {
        /// The environment that must have seen the version.
        environment: String,
    },
    /// A human must approve the version.
    ManualJudgement {
        /// How long a judgement may stay pending, in seconds.
        #[serde(default = "default_judgement_timeout")]
        timeout_seconds: u64,
    },
}

impl Constraint {
    /// The type tag used to match evaluators.
    #[must_use]
    pub fn constraint_type(&self) -> &'static str {
        match self {
            Self::DependsOn { .. } => DEPENDS_ON,
            Self::ManualJudgement { .. } => MANUAL_JUDGEMENT,
        }
    }
}

/// A verification run against an environment after deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
    /// Unique id within the environment.
    pub id: String,
    /// Type tag used to pick an evaluator.
    #[serde(rename = "type")]
    pub verification_type: String,
    /// Evaluator-specific settings.
    #[serde(default)]
    pub config: Value,
}

/// Where and how often to notify about an environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Channel kind, e.g. `slack` or `email`.
    #[serde(rename = "type")]
    pub channel_type: String,
    /// Channel address.
    pub address: String,
    /// `quiet`, `normal` or `verbose`.
    #[serde(default)]
    pub frequency: Option<String>,
}

/// A named stage in a delivery pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    /// Unique within the config.
    pub name: String,
    /// Resources owned by the environment.
    #[serde(default)]
    pub resources: Vec<Resource>,
    /// Promotion constraints.
    #[serde(default)]
    pub constraints: Vec<Constraint>,
    /// Verifications run after deployment.
    #[serde(default)]
    pub verify_with: Vec<Verification>,
    /// Notification settings; stored, not interpreted.
    #[serde(default)]
    pub notifications: Vec<NotificationConfig>,
}

impl Environment {
    /// Creates an empty environment.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resources: Vec::new(),
            constraints: Vec::new(),
            verify_with: Vec::new(),
            notifications: Vec::new(),
        }
    }

    /// Adds a resource.
    #[must_use]
    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.resources.push(resource);
        self
    }

    /// Adds a constraint.
    #[must_use]
    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// Adds a verification.
    #[must_use]
    pub fn with_verification(mut self, verification: Verification) -> Self {
        self.verify_with.push(verification);
        self
    }

    /// Returns the first declared constraint of a type.
    #[must_use]
    pub fn constraint(&self, constraint_type: &str) -> Option<&Constraint> {
        self.constraints
            .iter()
            .find(|c| c.constraint_type() == constraint_type)
    }

    /// Returns true if a constraint of the type is declared.
    #[must_use]
    pub fn has_constraint(&self, constraint_type: &str) -> bool {
        self.constraint(constraint_type).is_some()
    }
}

/// A user's pipeline for one application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Unique config name.
    pub name: String,
    /// The owning application.
    pub application: String,
    /// Identity used when actuating resources.
    pub service_account: String,
    /// Tracked artifacts.
    #[serde(default)]
    pub artifacts: Vec<DeliveryArtifact>,
    /// Ordered environments.
    #[serde(default)]
    pub environments: Vec<Environment>,
}

impl DeliveryConfig {
    /// Looks up an environment by name.
    #[must_use]
    pub fn environment(&self, name: &str) -> Option<&Environment> {
        self.environments.iter().find(|e| e.name == name)
    }

    /// Looks up an artifact by reference.
    #[must_use]
    pub fn artifact(&self, reference: &str) -> Option<&DeliveryArtifact> {
        self.artifacts.iter().find(|a| a.reference == reference)
    }

    /// All resources across all environments.
    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.environments.iter().flat_map(|e| e.resources.iter())
    }

    /// The environment that owns a resource.
    #[must_use]
    pub fn environment_of_resource(&self, resource_id: &str) -> Option<&Environment> {
        self.environments
            .iter()
            .find(|e| e.resources.iter().any(|r| r.id == resource_id))
    }
}

/// A resource as submitted by a user, before it is versioned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmittedResource {
    /// Unique id.
    pub id: String,
    /// Kind tag.
    pub kind: String,
    /// Extra metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    /// Desired-state spec.
    pub spec: Value,
}

/// An environment as submitted by a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmittedEnvironment {
    /// Environment name.
    pub name: String,
    /// Resources.
    #[serde(default)]
    pub resources: Vec<SubmittedResource>,
    /// Constraints.
    #[serde(default)]
    pub constraints: Vec<Constraint>,
    /// Verifications.
    #[serde(default)]
    pub verify_with: Vec<Verification>,
    /// Notifications.
    #[serde(default)]
    pub notifications: Vec<NotificationConfig>,
}

/// A delivery config as submitted by a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmittedDeliveryConfig {
    /// Config name.
    pub name: String,
    /// Application.
    pub application: String,
    /// Service account.
    pub service_account: String,
    /// Artifacts.
    #[serde(default)]
    pub artifacts: Vec<DeliveryArtifact>,
    /// Environments.
    #[serde(default)]
    pub environments: Vec<SubmittedEnvironment>,
}

/// The configured judgement timeout of a manual-judgement constraint.
#[must_use]
pub fn judgement_timeout(constraint: &Constraint) -> Option<Duration> {
    match constraint {
        Constraint::ManualJudgement { timeout_seconds } => Some(Duration::from_secs(*timeout_seconds)),
        Constraint::DependsOn { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_constraint_serialization() {
        let depends: Constraint = serde_json::from_value(json!({"type": "depends-on", "environment": "test"})).unwrap();
        assert_eq!(
            depends,
            Constraint::DependsOn {
                environment: "test".to_string()
            }
        );
        assert_eq!(depends.constraint_type(), DEPENDS_ON);

        let judgement: Constraint = serde_json::from_value(json!({"type": "manual-judgement"})).unwrap();
        assert_eq!(judgement_timeout(&judgement), Some(Duration::from_secs(604_800)));
    }

    #[test]
    fn test_config_lookups() {
        let config = DeliveryConfig {
            name: "keeldemo-manifest".to_string(),
            application: "keeldemo".to_string(),
            service_account: "keel@spinnaker.io".to_string(),
            artifacts: vec![DeliveryArtifact::debian("keeldemo", "keeldemo-deb")],
            environments: vec![
                Environment::new("test").with_resource(Resource::new("r1", "test/kind@v1", json!({}))),
                Environment::new("prod")
                    .with_resource(Resource::new("r2", "test/kind@v1", json!({})))
                    .with_constraint(Constraint::DependsOn {
                        environment: "test".to_string(),
                    }),
            ],
        };

        assert!(config.artifact("keeldemo-deb").is_some());
        assert!(config.artifact("missing").is_none());
        assert_eq!(config.resources().count(), 2);
        assert_eq!(config.environment_of_resource("r2").map(|e| e.name.as_str()), Some("prod"));
        assert!(config.environment("prod").is_some_and(|e| e.has_constraint(DEPENDS_ON)));
        assert!(!config.environment("test").is_some_and(|e| e.has_constraint(DEPENDS_ON)));
    }
}
