//! Result store
//!
//! Latest result per probe, keyed by `/<namespace>/<probeId>`:
//! - `put` overwrites unconditionally (last write wins)
//! - `get` returns `None` for absent or evicted keys, which callers treat as
//!   "unknown", never as non-compliant
//! - `delete` is idempotent
//!
//! There are no multi-key operations. Each key races independently with
//! eviction.

mod memory;
mod sled_store;

pub use memory::MemoryResultStore;
pub use sled_store::SledResultStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Persistence errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Backend cannot be reached or refused the operation
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Stored entry cannot be decoded
    #[error("Corrupt entry at {key}: {message}")]
    Corrupt { key: String, message: String },

    /// Entry cannot be encoded
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Latest stored outcome of a probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub probe_id: String,

    /// Normalized value
    pub value: String,

    pub observed_at: DateTime<Utc>,
}

impl ProbeResult {
    pub fn new(probe_id: impl Into<String>, value: impl Into<String>, observed_at: DateTime<Utc>) -> Self {
        Self {
            probe_id: probe_id.into(),
            value: value.into(),
            observed_at,
        }
    }

    /// Age relative to `now`, never negative
    pub fn age_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.observed_at).num_seconds().max(0)
    }
}

/// Namespaced key of a stored result
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResultKey {
    namespace: String,
    probe_id: String,
}

impl ResultKey {
    pub fn new(namespace: impl Into<String>, probe_id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into().trim_matches('/').to_string(),
            probe_id: probe_id.into(),
        }
    }

    pub fn probe_id(&self) -> &str {
        &self.probe_id
    }

    /// Persisted path, `/<namespace>/<probeId>`
    pub fn path(&self) -> String {
        format!("/{}/{}", self.namespace, self.probe_id)
    }
}

impl fmt::Display for ResultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}", self.namespace, self.probe_id)
    }
}

/// Stored document, the value under a `ResultKey`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredEntry {
    pub value: String,
    pub observed_at: DateTime<Utc>,
}

/// Key-value persistence of the latest result per probe
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Namespace prefixed to every key
    fn namespace(&self) -> &str;

    /// Overwrite the result of a probe
    async fn put(&self, probe_id: &str, value: &str, observed_at: DateTime<Utc>) -> StoreResult<()>;

    /// Read the current result of a probe
    async fn get(&self, probe_id: &str) -> StoreResult<Option<ProbeResult>>;

    /// Remove the result of a probe. No-op if absent.
    async fn delete(&self, probe_id: &str) -> StoreResult<()>;

    /// Key for a probe in this store
    fn key(&self, probe_id: &str) -> ResultKey {
        ResultKey::new(self.namespace(), probe_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_key_path() {
        assert_eq!(
            ResultKey::new("prober", "billing-budget-created").path(),
            "/prober/billing-budget-created"
        );
        assert_eq!(ResultKey::new("/prober/", "x").to_string(), "/prober/x");
    }

    #[test]
    fn test_age_never_negative() {
        let now = Utc::now();
        let past = ProbeResult::new("p", "COMPLIANT", now - Duration::seconds(90));
        assert_eq!(past.age_seconds(now), 90);

        let future = ProbeResult::new("p", "COMPLIANT", now + Duration::seconds(5));
        assert_eq!(future.age_seconds(now), 0);
    }
}
