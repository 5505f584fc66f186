//! Post-deployment verifications.
//!
//! Environments may declare verifications that run against whichever version
//! is currently deployed there. Verification results gate promotion through
//! the depends-on constraint of downstream environments.

mod runner;

use crate::core::{DeliveryArtifact, DeliveryConfig, Environment, Verification};
use crate::persistence::VerificationContext;
use async_trait::async_trait;
use serde_json::Value;

pub use runner::VerificationRunner;

/// Launches one kind of verification.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VerificationEvaluator: Send + Sync {
    /// The verification type tag this evaluator handles.
    fn supported_type(&self) -> String;

    /// Starts a verification and returns metadata to store with its state.
    async fn start(&self, context: &VerificationContext, verification: &Verification) -> anyhow::Result<Value>;
}

/// A deployed version in an environment that declares verifications.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationTarget {
    /// The owning config.
    pub config: DeliveryConfig,
    /// The environment.
    pub environment: Environment,
    /// The deployed artifact.
    pub artifact: DeliveryArtifact,
    /// The version currently deployed.
    pub version: String,
}

impl VerificationTarget {
    /// The storage key for this target's verification states.
    #[must_use]
    pub fn context(&self) -> VerificationContext {
        VerificationContext {
            delivery_config_name: self.config.name.clone(),
            environment: self.environment.name.clone(),
            artifact_reference: self.artifact.reference.clone(),
            version: self.version.clone(),
        }
    }
}
