//! Process-wide resources injected into every request context.

use crate::providers::Datastore;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Read-only handles shared by all requests: a datastore, static
/// configuration, and arbitrary typed extensions (HTTP clients, providers).
///
/// Built once at startup and wrapped in an `Arc`; the core never owns or
/// closes what it holds.
#[derive(Default)]
pub struct SharedResources {
    datastore: Option<Arc<dyn Datastore>>,
    config: HashMap<String, serde_json::Value>,
    extensions: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl SharedResources {
    /// Creates an empty resource set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the datastore.
    #[must_use]
    pub fn with_datastore(mut self, datastore: Arc<dyn Datastore>) -> Self {
        self.datastore = Some(datastore);
        self
    }

    /// Adds a configuration value.
    #[must_use]
    pub fn with_config(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    /// Adds a typed extension, replacing one of the same type.
    #[must_use]
    pub fn with_extension<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.extensions.insert(TypeId::of::<T>(), Arc::new(value));
        self
    }

    /// Returns the datastore, if one was configured.
    #[must_use]
    pub fn datastore(&self) -> Option<&Arc<dyn Datastore>> {
        self.datastore.as_ref()
    }

    /// Returns a configuration value.
    #[must_use]
    pub fn config(&self, key: &str) -> Option<&serde_json::Value> {
        self.config.get(key)
    }

    /// Returns the extension of type `T`.
    #[must_use]
    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.extensions
            .get(&TypeId::of::<T>())
            .and_then(|ext| Arc::clone(ext).downcast::<T>().ok())
    }
}

impl fmt::Debug for SharedResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedResources")
            .field("datastore", &self.datastore.is_some())
            .field("config_keys", &self.config.keys().collect::<Vec<_>>())
            .field("extensions", &self.extensions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::MemoryDatastore;

    #[derive(Debug, PartialEq)]
    struct ApiBase(String);

    #[test]
    fn test_empty_resources() {
        let shared = SharedResources::new();
        assert!(shared.datastore().is_none());
        assert!(shared.config("anything").is_none());
        assert!(shared.get::<ApiBase>().is_none());
    }

    #[test]
    fn test_extensions_by_type() {
        let shared = SharedResources::new()
            .with_extension(ApiBase("https://pokeapi.co/api/v2".to_string()))
            .with_extension(42_u32);

        assert_eq!(
            shared.get::<ApiBase>().as_deref(),
            Some(&ApiBase("https://pokeapi.co/api/v2".to_string()))
        );
        assert_eq!(shared.get::<u32>().as_deref(), Some(&42));
        assert!(shared.get::<String>().is_none());
    }

    #[test]
    fn test_datastore_and_config() {
        let shared = SharedResources::new()
            .with_datastore(Arc::new(MemoryDatastore::new(2)))
            .with_config("region", serde_json::json!("eu"));

        assert!(shared.datastore().is_some());
        assert_eq!(shared.config("region"), Some(&serde_json::json!("eu")));
    }
}
