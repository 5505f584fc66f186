//! Handler lookup by resource kind.

use super::{Exportable, ResourceHandler};
use crate::core::ResourceKind;
use crate::errors::{NotFoundError, PromoterError, Result};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Registered resource handlers, one per kind.
#[derive(Default)]
pub struct ResourceHandlerRegistry {
    handlers: RwLock<HashMap<ResourceKind, Arc<dyn ResourceHandler>>>,
}

impl ResourceHandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry from a list of handlers.
    #[must_use]
    pub fn with_handlers(handlers: impl IntoIterator<Item = Arc<dyn ResourceHandler>>) -> Self {
        let registry = Self::new();
        for handler in handlers {
            registry.register(handler);
        }
        registry
    }

    /// Registers a handler, replacing any previous handler for its kind.
    pub fn register(&self, handler: Arc<dyn ResourceHandler>) {
        let kind = handler.supported_kind();
        if self.handlers.write().insert(kind.clone(), handler).is_some() {
            tracing::warn!(kind = %kind, "Replaced resource handler");
        }
    }

    /// The handler for a kind.
    pub fn supporting(&self, kind: &ResourceKind) -> Result<Arc<dyn ResourceHandler>> {
        self.handlers.read().get(kind).cloned().ok_or_else(|| {
            NotFoundError::UnsupportedResourceKind {
                kind: kind.to_string(),
            }
            .into()
        })
    }

    /// Returns true if a handler exists for the kind.
    #[must_use]
    pub fn supports(&self, kind: &ResourceKind) -> bool {
        self.handlers.read().contains_key(kind)
    }

    /// Registered kinds, sorted.
    #[must_use]
    pub fn kinds(&self) -> Vec<ResourceKind> {
        let mut kinds: Vec<_> = self.handlers.read().keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Exports existing infrastructure through the handler for its kind.
    pub async fn export(&self, exportable: &Exportable) -> Result<Value> {
        let handler = self.supporting(&exportable.kind)?;
        handler
            .export(exportable)
            .await
            .map_err(|e| PromoterError::Handler(e.into()))
    }
}

impl std::fmt::Debug for ResourceHandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceHandlerRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixtures, MockResourceHandler};
    use std::collections::BTreeSet;

    #[test]
    fn test_lookup_by_kind() {
        let registry = ResourceHandlerRegistry::new();
        registry.register(Arc::new(MockResourceHandler::new(fixtures::CLUSTER_KIND)));

        let kind = ResourceKind::from(fixtures::CLUSTER_KIND);
        assert!(registry.supports(&kind));
        assert!(registry.supporting(&kind).is_ok());

        let err = registry
            .supporting(&ResourceKind::from("ec2/security-group@v1"))
            .unwrap_err();
        assert_eq!(err.status_code(), 404);
        assert!(err.to_string().contains("ec2/security-group@v1"));
    }

    #[tokio::test]
    async fn test_export_without_support_fails() {
        let registry = ResourceHandlerRegistry::with_handlers([
            Arc::new(MockResourceHandler::new(fixtures::CLUSTER_KIND)) as Arc<dyn ResourceHandler>
        ]);
        let exportable = Exportable {
            account: "test".to_string(),
            kind: ResourceKind::from(fixtures::CLUSTER_KIND),
            name: "keeldemo-test".to_string(),
            regions: BTreeSet::from(["us-west-2".to_string()]),
        };
        let err = registry.export(&exportable).await.unwrap_err();
        assert!(matches!(err, PromoterError::Handler(_)));
    }
}
