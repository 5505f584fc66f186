//! Ordered veto chain.

use super::{Veto, VetoResponse};
use crate::core::Resource;
use crate::errors::Result;
use std::sync::Arc;
use tracing::debug;

/// Name reported when every veto allows a resource.
const ALL_VETOES: &str = "all";

/// Consults vetoes in priority order; the first denial wins.
#[derive(Default)]
pub struct VetoEnforcer {
    vetoes: Vec<Arc<dyn Veto>>,
}

impl VetoEnforcer {
    /// Creates an empty chain, which allows everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a chain from a list of vetoes.
    #[must_use]
    pub fn with_vetoes(vetoes: impl IntoIterator<Item = Arc<dyn Veto>>) -> Self {
        let mut enforcer = Self::new();
        for veto in vetoes {
            enforcer.add(veto);
        }
        enforcer
    }

    /// Adds a veto to the chain.
    pub fn add(&mut self, veto: Arc<dyn Veto>) {
        self.vetoes.push(veto);
        self.vetoes.sort_by_key(|v| v.priority());
    }

    /// Decides whether the resource may be actuated.
    pub async fn can_check(&self, resource: &Resource) -> Result<VetoResponse> {
        for veto in &self.vetoes {
            let response = veto.check(resource).await?;
            if !response.allowed {
                debug!(resource_id = %resource.id, veto = %veto.name(), message = ?response.message, "Resource vetoed");
                return Ok(response);
            }
        }
        Ok(VetoResponse::allowed(ALL_VETOES))
    }

    /// The names of the registered vetoes, in evaluation order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.vetoes.iter().map(|v| v.name().to_string()).collect()
    }

    /// Returns the number of vetoes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.vetoes.len()
    }

    /// Returns true if the chain is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vetoes.is_empty()
    }
}

impl std::fmt::Debug for VetoEnforcer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VetoEnforcer").field("vetoes", &self.names()).finish()
    }
}
