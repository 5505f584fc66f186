//! Vetoes consulted before a resource is actuated.

mod enforcer;
mod unhappy;

pub use enforcer::VetoEnforcer;
pub use unhappy::UnhappyVeto;

use crate::core::Resource;
use crate::errors::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A veto's answer for one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VetoResponse {
    /// False blocks actuation.
    pub allowed: bool,
    /// The veto that answered.
    pub veto_name: String,
    /// Also bar the resource's current artifact version from its environment.
    pub veto_artifact: bool,
    /// Why the resource was blocked.
    pub message: Option<String>,
}

impl VetoResponse {
    /// An allowing response.
    #[must_use]
    pub fn allowed(veto_name: impl Into<String>) -> Self {
        Self {
            allowed: true,
            veto_name: veto_name.into(),
            veto_artifact: false,
            message: None,
        }
    }

    /// A denying response that also asks for the artifact version to be vetoed.
    #[must_use]
    pub fn denied(veto_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            allowed: false,
            veto_name: veto_name.into(),
            veto_artifact: true,
            message: Some(message.into()),
        }
    }

    /// Sets whether the artifact version should be vetoed.
    #[must_use]
    pub fn with_veto_artifact(mut self, veto_artifact: bool) -> Self {
        self.veto_artifact = veto_artifact;
        self
    }
}

/// A rule that can block a resource from being actuated.
#[async_trait]
pub trait Veto: Send + Sync {
    /// The veto's name, reported in events.
    fn name(&self) -> &str;

    /// Lower runs earlier.
    fn priority(&self) -> i32 {
        0
    }

    /// Decides whether the resource may be checked.
    async fn check(&self, resource: &Resource) -> Result<VetoResponse>;

    /// Resource ids currently blocked.
    async fn current_rejections(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}
