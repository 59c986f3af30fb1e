//! Resource provider adapter seam
//!
//! The only boundary to real infrastructure. The engine hands an adapter
//! an opaque kind tag plus configuration and gets back an opaque
//! fingerprint and output attributes; it never interprets either.

mod simulated;

pub use simulated::SimulatedProvider;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

/// Request to create or update one resource
#[derive(Debug, Clone)]
pub struct ApplyRequest {
    pub stack: String,
    pub resource: String,
    pub kind: String,
    /// Desired configuration with parameter references already resolved
    pub config: Value,
    /// Fingerprint from the last successful apply, absent on create
    pub previous_fingerprint: Option<String>,
}

/// Result of a successful apply
#[derive(Debug, Clone)]
pub struct ApplyResponse {
    pub fingerprint: String,
    pub attributes: BTreeMap<String, Value>,
}

/// Request to destroy one resource
#[derive(Debug, Clone)]
pub struct DestroyRequest {
    pub stack: String,
    pub resource: String,
    pub kind: String,
    pub fingerprint: String,
}

/// Executes create/update/delete for the resource kinds it owns.
/// Timeouts are the adapter's concern and surface as ordinary errors.
#[async_trait]
pub trait ResourceProviderAdapter: Send + Sync {
    async fn apply(&self, request: ApplyRequest) -> Result<ApplyResponse>;

    async fn destroy(&self, request: DestroyRequest) -> Result<()>;
}

/// Routes resource kinds to their adapters. A kind tag routes by its
/// namespace prefix (`network/vpc` routes as `network`), falling back to
/// a catch-all adapter when one is registered.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    adapters: HashMap<String, Arc<dyn ResourceProviderAdapter>>,
    fallback: Option<Arc<dyn ResourceProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        namespace: impl Into<String>,
        adapter: Arc<dyn ResourceProviderAdapter>,
    ) {
        self.adapters.insert(namespace.into(), adapter);
    }

    /// Adapter used for any kind without a registered namespace
    pub fn register_fallback(&mut self, adapter: Arc<dyn ResourceProviderAdapter>) {
        self.fallback = Some(adapter);
    }

    pub fn adapter_for(&self, kind: &str) -> Option<Arc<dyn ResourceProviderAdapter>> {
        let namespace = kind.split('/').next().unwrap_or(kind);
        self.adapters
            .get(namespace)
            .or(self.fallback.as_ref())
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockProvider;

    #[test]
    fn test_registry_routes_by_namespace() {
        let mut registry = ProviderRegistry::new();
        let network = Arc::new(MockProvider::new());
        registry.register("network", network);

        assert!(registry.adapter_for("network/vpc").is_some());
        assert!(registry.adapter_for("compute/instance").is_none());
    }

    #[test]
    fn test_registry_fallback() {
        let mut registry = ProviderRegistry::new();
        registry.register_fallback(Arc::new(MockProvider::new()));
        assert!(registry.adapter_for("anything/at-all").is_some());
    }
}
