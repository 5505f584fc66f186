//! Resource handlers and actuation pausing.
//!
//! A [`ResourceHandler`] knows how to read and change one kind of
//! infrastructure. Handlers are registered by kind in a
//! [`ResourceHandlerRegistry`] at process start; the actuator dispatches on
//! [`Resource::kind`].

mod pauser;
mod registry;

pub use pauser::{ActuationPauser, PauseScope};
pub use registry::ResourceHandlerRegistry;

use crate::core::{LaunchedTask, Resource, ResourceDiff, ResourceKind};
use crate::errors::HandlerError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// Result type returned by handlers.
pub type HandlerResult<T> = std::result::Result<T, HandlerError>;

/// What a handler wants a resource to look like.
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredState {
    /// The desired spec, compared against the current one.
    pub spec: Value,
    /// The resource with any handler-resolved values filled in, such as the
    /// artifact version it should run.
    pub resolved: Resource,
}

/// Identifies existing infrastructure to turn into a resource spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exportable {
    /// Cloud account.
    pub account: String,
    /// Resource kind to export as.
    pub kind: ResourceKind,
    /// Name of the existing infrastructure.
    pub name: String,
    /// Regions it lives in.
    #[serde(default)]
    pub regions: BTreeSet<String>,
}

/// Reads and actuates one kind of resource.
///
/// Every method may fail with [`HandlerError::CurrentlyUnresolvable`] when the
/// resource's dependencies are not ready; the check is then abandoned and
/// retried later.
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    /// Handler name, recorded on launched tasks.
    fn name(&self) -> &str;

    /// The kind this handler manages.
    fn supported_kind(&self) -> ResourceKind;

    /// Resolves the desired state.
    async fn desired(&self, resource: &Resource) -> HandlerResult<DesiredState>;

    /// Reads the current state; `None` if the resource does not exist.
    async fn current(&self, resource: &Resource) -> HandlerResult<Option<Value>>;

    /// Creates a missing resource.
    async fn create(&self, resource: &Resource, diff: &ResourceDiff) -> HandlerResult<Vec<LaunchedTask>>;

    /// Corrects a drifted resource.
    async fn update(&self, resource: &Resource, diff: &ResourceDiff) -> HandlerResult<Vec<LaunchedTask>>;

    /// Returns true while previously launched tasks are still running.
    async fn actuation_in_progress(&self, _resource: &Resource) -> HandlerResult<bool> {
        Ok(false)
    }

    /// Builds a resource spec from existing infrastructure.
    async fn export(&self, exportable: &Exportable) -> HandlerResult<Value> {
        Err(HandlerError::failed(format!(
            "{} cannot export {}",
            self.name(),
            exportable.kind
        )))
    }
}

impl std::fmt::Debug for dyn ResourceHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceHandler")
            .field("name", &self.name())
            .field("kind", &self.supported_kind())
            .finish()
    }
}
