//! In-memory result store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

use super::{ProbeResult, ResultKey, ResultStore, StoreError, StoreResult, StoredEntry};

/// Result store backed by a `HashMap<path, entry>`
#[derive(Debug)]
pub struct MemoryResultStore {
    namespace: String,
    entries: RwLock<HashMap<String, StoredEntry>>,
}

impl MemoryResultStore {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored results
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned() -> StoreError {
        StoreError::Unavailable("memory store lock poisoned".to_string())
    }
}

impl Default for MemoryResultStore {
    fn default() -> Self {
        Self::new("prober")
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn put(&self, probe_id: &str, value: &str, observed_at: DateTime<Utc>) -> StoreResult<()> {
        let path = ResultKey::new(&self.namespace, probe_id).path();
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        entries.insert(
            path,
            StoredEntry {
                value: value.to_string(),
                observed_at,
            },
        );
        Ok(())
    }

    async fn get(&self, probe_id: &str) -> StoreResult<Option<ProbeResult>> {
        let path = ResultKey::new(&self.namespace, probe_id).path();
        let entries = self.entries.read().map_err(|_| Self::poisoned())?;
        Ok(entries
            .get(&path)
            .map(|e| ProbeResult::new(probe_id, e.value.clone(), e.observed_at)))
    }

    async fn delete(&self, probe_id: &str) -> StoreResult<()> {
        let path = ResultKey::new(&self.namespace, probe_id).path();
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        entries.remove(&path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_overwrites() {
        let store = MemoryResultStore::new("prober");
        let first = Utc::now();
        let second = first + chrono::Duration::seconds(1);

        store.put("p", "NON_COMPLIANT", first).await.unwrap();
        store.put("p", "COMPLIANT", second).await.unwrap();

        let result = store.get("p").await.unwrap().unwrap();
        assert_eq!(result.value, "COMPLIANT");
        assert_eq!(result.observed_at, second);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = MemoryResultStore::default();
        store.put("a", "COMPLIANT", Utc::now()).await.unwrap();
        store.put("b", "COMPLIANT", Utc::now()).await.unwrap();

        store.delete("a").await.unwrap();
        store.delete("a").await.unwrap();
        store.delete("never-written").await.unwrap();

        assert!(store.get("a").await.unwrap().is_none());
        assert!(store.get("b").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_namespaces_do_not_collide() {
        let store = MemoryResultStore::new("one");
        assert_eq!(store.key("p").path(), "/one/p");
        assert!(store.get("p").await.unwrap().is_none());
    }
}
