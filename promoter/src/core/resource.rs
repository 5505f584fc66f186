//! Managed resources.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Metadata key holding the owning application.
pub const APPLICATION_KEY: &str = "application";
/// Metadata key holding the service account used to actuate.
pub const SERVICE_ACCOUNT_KEY: &str = "serviceAccount";
/// Spec key naming the artifact reference a resource deploys.
pub const ARTIFACT_REFERENCE_KEY: &str = "artifactReference";
/// Spec key a handler sets on a resolved resource to name the version it deploys.
pub const ARTIFACT_VERSION_KEY: &str = "artifactVersion";

/// A resource kind tag such as `ec2/cluster@v1`, used to pick a handler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceKind(String);

impl ResourceKind {
    /// Creates a kind tag.
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    /// The tag as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceKind {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A single piece of managed infrastructure with a desired spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Unique id across all delivery configs.
    pub id: String,
    /// Kind tag.
    pub kind: ResourceKind,
    /// Free-form metadata; carries the application and service account.
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    /// The desired-state spec, interpreted by the kind's handler.
    pub spec: Value,
    /// Bumped each time the spec changes.
    #[serde(default = "default_version")]
    pub version: u64,
}

fn default_version() -> u64 {
    1
}

impl Resource {
    /// Creates a resource at version 1.
    #[must_use]
    pub fn new(id: impl Into<String>, kind: impl Into<ResourceKind>, spec: Value) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            metadata: BTreeMap::new(),
            spec,
            version: default_version(),
        }
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// The owning application, or an empty string if unset.
    #[must_use]
    pub fn application(&self) -> &str {
        self.metadata
            .get(APPLICATION_KEY)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// The service account recorded on persist.
    #[must_use]
    pub fn service_account(&self) -> Option<&str> {
        self.metadata.get(SERVICE_ACCOUNT_KEY).and_then(Value::as_str)
    }

    /// The artifact reference this resource deploys, if any.
    #[must_use]
    pub fn artifact_reference(&self) -> Option<&str> {
        self.spec.get(ARTIFACT_REFERENCE_KEY).and_then(Value::as_str)
    }

    /// The artifact version a resolved resource deploys, if its handler recorded one.
    #[must_use]
    pub fn artifact_version(&self) -> Option<&str> {
        self.spec.get(ARTIFACT_VERSION_KEY).and_then(Value::as_str)
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, v{})", self.id, self.kind, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resource_accessors() {
        let resource = Resource::new(
            "ec2:cluster:test:keeldemo",
            "ec2/cluster@v1",
            json!({"artifactReference": "keeldemo-deb", "capacity": 2}),
        )
        .with_metadata(APPLICATION_KEY, "keeldemo")
        .with_metadata(SERVICE_ACCOUNT_KEY, "keel@spinnaker.io");

        assert_eq!(resource.application(), "keeldemo");
        assert_eq!(resource.service_account(), Some("keel@spinnaker.io"));
        assert_eq!(resource.artifact_reference(), Some("keeldemo-deb"));
        assert_eq!(resource.version, 1);
    }

    #[test]
    fn test_resource_without_artifact() {
        let resource = Resource::new("sg:test", "ec2/security-group@v1", json!({"rules": []}));
        assert_eq!(resource.artifact_reference(), None);
        assert_eq!(resource.application(), "");
    }

    #[test]
    fn test_resource_deserialize_defaults_version() {
        let resource: Resource = serde_json::from_value(json!({
            "id": "r1",
            "kind": "test/kind@v1",
            "spec": {}
        }))
        .unwrap();
        assert_eq!(resource.version, 1);
        assert_eq!(resource.kind.as_str(), "test/kind@v1");
    }
}
