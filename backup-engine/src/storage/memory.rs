use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use super::ObjectStore;

/// Process-local object store, for embedding and tests.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: DashMap<String, Bytes>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, data: Bytes) -> anyhow::Result<String> {
        self.objects.insert(key.to_string(), data);
        Ok(format!("memory://{}", key))
    }

    async fn get(&self, key: &str) -> anyhow::Result<Bytes> {
        self.objects
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| anyhow::anyhow!("object not found: {}", key))
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.objects.remove(key);
        Ok(())
    }
}
