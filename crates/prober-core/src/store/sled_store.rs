//! Sled-backed result store
//!
//! Each result is a JSON document `{value, observed_at}` stored under its
//! `/<namespace>/<probeId>` path in the default tree.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;

use super::{ProbeResult, ResultKey, ResultStore, StoreError, StoreResult, StoredEntry};

/// Persistent result store on an embedded sled database
#[derive(Debug, Clone)]
pub struct SledResultStore {
    namespace: String,
    db: sled::Db,
}

impl SledResultStore {
    /// Open (or create) a store at `path`
    pub fn open(path: impl AsRef<Path>, namespace: impl Into<String>) -> StoreResult<Self> {
        let db = sled::open(path.as_ref()).map_err(|e| {
            StoreError::Unavailable(format!(
                "cannot open sled database at {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Ok(Self {
            namespace: namespace.into(),
            db,
        })
    }

    /// Flush pending writes to disk
    pub async fn flush(&self) -> StoreResult<()> {
        self.db
            .flush_async()
            .await
            .map(|_| ())
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

#[async_trait]
impl ResultStore for SledResultStore {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn put(&self, probe_id: &str, value: &str, observed_at: DateTime<Utc>) -> StoreResult<()> {
        let path = ResultKey::new(&self.namespace, probe_id).path();
        let entry = StoredEntry {
            value: value.to_string(),
            observed_at,
        };
        let bytes =
            serde_json::to_vec(&entry).map_err(|e| StoreError::Serialization(e.to_string()))?;

        self.db
            .insert(path.as_bytes(), bytes)
            .map(|_| ())
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    async fn get(&self, probe_id: &str) -> StoreResult<Option<ProbeResult>> {
        let path = ResultKey::new(&self.namespace, probe_id).path();
        let raw = self
            .db
            .get(path.as_bytes())
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        match raw {
            Some(bytes) => {
                let entry: StoredEntry =
                    serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
                        key: path.clone(),
                        message: e.to_string(),
                    })?;
                Ok(Some(ProbeResult::new(probe_id, entry.value, entry.observed_at)))
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, probe_id: &str) -> StoreResult<()> {
        let path = ResultKey::new(&self.namespace, probe_id).path();
        self.db
            .remove(path.as_bytes())
            .map(|_| ())
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}
