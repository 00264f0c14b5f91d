//! Object storage providers.
//!
//! Artifacts record the provider name they were written with; every later
//! read or delete is routed through that provider, never through whatever
//! happens to be the current default.

pub mod local;
pub mod manifest;
pub mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;

pub use local::LocalObjectStore;
pub use manifest::ArtifactManifest;
pub use memory::MemoryObjectStore;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stores `data` under `key` and returns a locator for the object.
    async fn put(&self, key: &str, data: Bytes) -> anyhow::Result<String>;

    async fn get(&self, key: &str) -> anyhow::Result<Bytes>;

    /// Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct StorageRegistry {
    providers: HashMap<String, Arc<dyn ObjectStore>>,
    default_provider: String,
}

impl StorageRegistry {
    pub fn new(default_provider: impl Into<String>) -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: default_provider.into(),
        }
    }

    pub fn with_provider(mut self, name: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        self.providers.insert(name.into(), store);
        self
    }

    pub fn default_provider(&self) -> &str {
        &self.default_provider
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ObjectStore>> {
        self.providers.get(name).cloned()
    }

    pub fn provider_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }
}

pub const CONTENT_OBJECT: &str = "content.bin";
pub const MANIFEST_OBJECT: &str = "manifest.json.zst";

/// Object key for one file of an artifact: `<target>/<kind>/<artifact>/<name>`.
pub fn object_key(target_id: &str, kind: &str, artifact_id: &str, name: &str) -> String {
    format!("{}/{}/{}/{}", target_id, kind, artifact_id, name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let registry = StorageRegistry::new("primary")
            .with_provider("primary", Arc::new(MemoryObjectStore::new()))
            .with_provider("archive", Arc::new(MemoryObjectStore::new()));

        assert_eq!(registry.default_provider(), "primary");
        assert!(registry.get("archive").is_some());
        assert!(registry.get("glacier").is_none());
        assert_eq!(registry.provider_names(), vec!["archive", "primary"]);
    }

    #[test]
    fn test_object_keys_are_unique_per_artifact() {
        let a = object_key("site", "full", "a1", CONTENT_OBJECT);
        let b = object_key("site", "full", "a2", CONTENT_OBJECT);
        assert_ne!(a, b);
        assert_eq!(a, "site/full/a1/content.bin");
    }
}
