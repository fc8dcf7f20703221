//! Pluggable execution services — the interface boundary only.
//!
//! A service validates submitted options and computes the resource tag the
//! external scheduler consumes. Everything else about a service (where and
//! how jobs actually run) lives outside this crate.

pub mod simple;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::error::ServiceError;

pub use simple::SimpleService;

/// One pluggable execution backend.
pub trait Service: Send + Sync {
    /// Human-readable name shown by `/list_services`.
    fn display_name(&self) -> &str;

    /// Service-defined description of its accepted options.
    fn describe(&self) -> serde_json::Value;

    /// Validate submitted options, returning a service-defined detail
    /// message. [`ServiceError::Invalid`] marks a user error (400);
    /// [`ServiceError::Internal`] an unexpected plugin failure (500).
    fn check(&self, options: &serde_json::Value) -> Result<String, ServiceError>;

    /// Compute the resource tag for a submission. Called once at creation;
    /// the tag is stored verbatim for the external scheduler and never
    /// reinterpreted by this crate.
    fn resource_from_options(&self, options: &serde_json::Value) -> String;
}

/// Name → service map, injected into the API state (no ambient singletons).
#[derive(Default)]
pub struct ServiceRegistry {
    services: HashMap<String, Arc<dyn Service>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, service: Arc<dyn Service>) {
        self.services.insert(name.into(), service);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Service>> {
        self.services.get(name).cloned()
    }

    /// Sorted name → display-name map for `/list_services`.
    pub fn display_names(&self) -> BTreeMap<String, String> {
        self.services
            .iter()
            .map(|(name, svc)| (name.clone(), svc.display_name().to_string()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_lookup_and_listing() {
        let mut registry = ServiceRegistry::new();
        registry.register(
            "train",
            Arc::new(SimpleService::new("Training cluster", "default-pool")),
        );
        assert!(registry.get("train").is_some());
        assert!(registry.get("mystery").is_none());
        assert_eq!(
            registry.display_names().get("train").map(String::as_str),
            Some("Training cluster")
        );
    }
}
