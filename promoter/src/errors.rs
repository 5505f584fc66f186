//! Error types for the promoter engine.
//!
//! The taxonomy separates failures callers should see (not-found, validation)
//! from failures the control loop absorbs and retries on the next check
//! (unresolvable resources, resolution failures, timeouts).

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T, E = PromoterError> = std::result::Result<T, E>;

/// The main error type for promoter operations.
#[derive(Debug, Error)]
pub enum PromoterError {
    /// A referenced entity does not exist.
    #[error("{0}")]
    NotFound(#[from] NotFoundError),

    /// A submitted delivery config failed validation.
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// A resource handler failed to resolve desired or current state.
    #[error("{0}")]
    Resolution(#[from] ResolutionError),

    /// A resource depends on something that is not ready yet.
    #[error("Resource {resource_id} is currently unresolvable: {message}")]
    CurrentlyUnresolvable {
        /// The resource being checked.
        resource_id: String,
        /// Why it cannot be resolved right now.
        message: String,
    },

    /// An operation exceeded its deadline.
    #[error("Timed out after {elapsed_ms}ms: {operation}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The deadline that was exceeded, in milliseconds.
        elapsed_ms: u64,
    },

    /// A collaborator (handler, supplier, agent) failed.
    #[error("Handler error: {0}")]
    Handler(#[source] anyhow::Error),

    /// An engine setting is out of range.
    #[error("Invalid configuration {field}: {message}")]
    Config {
        /// The offending setting.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PromoterError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns the HTTP-equivalent status code for API callers.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Validation(ValidationError::TooManyDeliveryConfigs { .. }) => 409,
            Self::Validation(_) => 400,
            _ => 500,
        }
    }

    /// Returns true if the failure resolves itself on a later check.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::CurrentlyUnresolvable { .. } | Self::Resolution(_) | Self::Timeout { .. }
        )
    }
}

/// Errors raised when an entity cannot be found.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NotFoundError {
    /// The artifact is not registered.
    #[error("No {artifact_type} artifact named {name} is registered")]
    NoSuchArtifact {
        /// Artifact name.
        name: String,
        /// Artifact type.
        artifact_type: String,
    },

    /// No artifact with this reference exists in the delivery config.
    #[error("No artifact with reference {reference} in delivery config {delivery_config}")]
    ArtifactNotFound {
        /// The artifact reference.
        reference: String,
        /// The delivery config searched.
        delivery_config: String,
    },

    /// The delivery config does not exist.
    #[error("No delivery config named {name}")]
    NoSuchDeliveryConfig {
        /// Config name.
        name: String,
    },

    /// No delivery config exists for the application.
    #[error("No delivery config for application {application}")]
    NoDeliveryConfigForApplication {
        /// Application name.
        application: String,
    },

    /// The environment does not exist in the config.
    #[error("No environment named {environment} in delivery config {delivery_config}")]
    NoSuchEnvironment {
        /// Config name.
        delivery_config: String,
        /// Environment name.
        environment: String,
    },

    /// The resource does not exist.
    #[error("No resource with id {id}")]
    NoSuchResource {
        /// Resource id.
        id: String,
    },

    /// The resource exists but belongs to no delivery config.
    #[error("Resource {id} exists without being a part of a delivery config")]
    OrphanedResource {
        /// Resource id.
        id: String,
    },

    /// No handler is registered for the resource kind.
    #[error("No resource handler supports kind {kind}")]
    UnsupportedResourceKind {
        /// The kind that could not be handled.
        kind: String,
    },
}

/// Diagnostic metadata attached to validation errors.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ErrorInfo {
    /// Error code (e.g., "CONFIG-002-DUPLICATE-RESOURCE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ErrorInfo {
    /// Creates a new error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Converts to a JSON representation.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Errors raised while validating a submitted delivery config.
///
/// These are always raised before anything is persisted.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// Two or more resources share an id.
    #[error("Duplicate resource ids found: {duplicates:?} (by environment: {by_environment:?})")]
    DuplicateResourceId {
        /// The ids that appear more than once.
        duplicates: Vec<String>,
        /// Environment name to the duplicated ids it contains.
        by_environment: BTreeMap<String, Vec<String>>,
    },

    /// Two or more artifacts share a reference.
    #[error("Duplicate artifact references found: {references:?}")]
    DuplicateArtifactReference {
        /// The references that appear more than once.
        references: Vec<String>,
    },

    /// Two or more environments share a name.
    #[error("Duplicate environment names found: {names:?}")]
    DuplicateEnvironmentName {
        /// The names that appear more than once.
        names: Vec<String>,
    },

    /// The application already has a different delivery config.
    #[error("Application {application} already has delivery config {existing}; only one is allowed")]
    TooManyDeliveryConfigs {
        /// The application.
        application: String,
        /// The config already stored for it.
        existing: String,
    },

    /// A constraint names an environment that does not exist.
    #[error("Environment {environment} depends on unknown environment {missing}")]
    MissingEnvironmentReference {
        /// The environment declaring the constraint.
        environment: String,
        /// The environment it references.
        missing: String,
    },
}

impl ValidationError {
    /// Returns diagnostic metadata for the error.
    #[must_use]
    pub fn error_info(&self) -> ErrorInfo {
        match self {
            Self::DuplicateResourceId {
                duplicates,
                by_environment,
            } => {
                let mut info = ErrorInfo::new(
                    "CONFIG-002-DUPLICATE-RESOURCE",
                    "Resource ids must be unique across all environments",
                )
                .with_fix_hint("Rename or remove the duplicated resources")
                .with_context_entry("duplicates", duplicates.join(","));
                for (env, ids) in by_environment {
                    info = info.with_context_entry(format!("environment.{env}"), ids.join(","));
                }
                info
            }
            Self::DuplicateArtifactReference { references } => ErrorInfo::new(
                "CONFIG-003-DUPLICATE-ARTIFACT",
                "Artifact references must be unique within a delivery config",
            )
            .with_fix_hint("Give each artifact a distinct reference")
            .with_context_entry("references", references.join(",")),
            Self::DuplicateEnvironmentName { names } => ErrorInfo::new(
                "CONFIG-001-DUPLICATE-ENVIRONMENT",
                "Environment names must be unique within a delivery config",
            )
            .with_context_entry("names", names.join(",")),
            Self::TooManyDeliveryConfigs {
                application,
                existing,
            } => ErrorInfo::new(
                "CONFIG-005-TOO-MANY-CONFIGS",
                "An application may only have one delivery config",
            )
            .with_fix_hint(format!("Delete delivery config {existing} first, or submit under that name"))
            .with_context_entry("application", application.clone()),
            Self::MissingEnvironmentReference {
                environment,
                missing,
            } => ErrorInfo::new(
                "CONFIG-004-MISSING-ENVIRONMENT",
                "A depends-on constraint references an environment that does not exist",
            )
            .with_context_entry("environment", environment.clone())
            .with_context_entry("missing", missing.clone()),
        }
    }
}

/// A resource handler failed unexpectedly while resolving state.
#[derive(Debug, Error)]
pub enum ResolutionError {
    /// Resolving the desired state failed.
    #[error("Unable to resolve desired state of resource {resource_id}: {source}")]
    CannotResolveDesiredState {
        /// The resource being checked.
        resource_id: String,
        /// The handler's failure.
        #[source]
        source: anyhow::Error,
    },

    /// Resolving the current state failed.
    #[error("Unable to resolve current state of resource {resource_id}: {source}")]
    CannotResolveCurrentState {
        /// The resource being checked.
        resource_id: String,
        /// The handler's failure.
        #[source]
        source: anyhow::Error,
    },
}

/// Failure signal returned by resource handlers.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The resource's dependencies are not ready; retry on the next check.
    #[error("Resource is currently unresolvable: {0}")]
    CurrentlyUnresolvable(String),

    /// Any other handler failure.
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl HandlerError {
    /// Creates a failure from a message.
    #[must_use]
    pub fn failed(message: impl std::fmt::Debug + std::fmt::Display + Send + Sync + 'static) -> Self {
        Self::Failed(anyhow::Error::msg(message))
    }
}
