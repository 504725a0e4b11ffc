//! In-memory probe executor (testing and local dry runs)
//!
//! `StaticExecutor` answers from a script set per probe id and per shared
//! call key, and counts how often each target was called.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use super::{ExecutionError, FailureReason, ProbeExecutor, SharedResponse};

/// Scripted answer for one target
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Answer immediately with this value
    Value(String),
    /// Answer with this value after a delay
    Delayed(Duration, String),
    /// Answer immediately with shared-call fields
    Fields(BTreeMap<String, serde_json::Value>),
    /// Fail with this reason
    Fail(FailureReason),
    /// Never answer
    Hang,
}

/// Scripted executor backed by in-memory maps
#[derive(Debug, Default)]
pub struct StaticExecutor {
    probes: Mutex<HashMap<String, ScriptedReply>>,
    shared: Mutex<HashMap<String, ScriptedReply>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl StaticExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a probe answer
    pub fn with_probe(self, probe_id: impl Into<String>, reply: ScriptedReply) -> Self {
        self.set_probe(probe_id, reply);
        self
    }

    /// Script a shared call answer
    pub fn with_shared(self, key: impl Into<String>, reply: ScriptedReply) -> Self {
        self.set_shared(key, reply);
        self
    }

    /// Replace a probe answer
    pub fn set_probe(&self, probe_id: impl Into<String>, reply: ScriptedReply) {
        self.probes.lock().unwrap().insert(probe_id.into(), reply);
    }

    /// Replace a shared call answer
    pub fn set_shared(&self, key: impl Into<String>, reply: ScriptedReply) {
        self.shared.lock().unwrap().insert(key.into(), reply);
    }

    /// Number of calls made for a probe id or shared key
    pub fn calls(&self, target: &str) -> usize {
        self.calls.lock().unwrap().get(target).copied().unwrap_or(0)
    }

    fn record(&self, target: &str) {
        *self.calls.lock().unwrap().entry(target.to_string()).or_insert(0) += 1;
    }

    fn reply_for(map: &Mutex<HashMap<String, ScriptedReply>>, target: &str) -> Option<ScriptedReply> {
        map.lock().unwrap().get(target).cloned()
    }

    fn failure(target: &str, reason: FailureReason) -> ExecutionError {
        ExecutionError::new(target, reason, "scripted failure")
    }
}

#[async_trait]
impl ProbeExecutor for StaticExecutor {
    fn name(&self) -> &str {
        "static"
    }

    async fn invoke(&self, probe_id: &str) -> Result<String, ExecutionError> {
        self.record(probe_id);
        match Self::reply_for(&self.probes, probe_id) {
            Some(ScriptedReply::Value(value)) => Ok(value),
            Some(ScriptedReply::Delayed(delay, value)) => {
                tokio::time::sleep(delay).await;
                Ok(value)
            }
            Some(ScriptedReply::Fail(reason)) => Err(Self::failure(probe_id, reason)),
            Some(ScriptedReply::Hang) => std::future::pending().await,
            Some(ScriptedReply::Fields(_)) => Err(ExecutionError::malformed(
                probe_id,
                "fields scripted for an independent probe",
            )),
            None => Err(ExecutionError::upstream(probe_id, "no scripted reply")),
        }
    }

    async fn invoke_shared(&self, shared_call_key: &str) -> Result<SharedResponse, ExecutionError> {
        self.record(shared_call_key);
        match Self::reply_for(&self.shared, shared_call_key) {
            Some(ScriptedReply::Fields(fields)) => Ok(SharedResponse::new(shared_call_key, fields)),
            Some(ScriptedReply::Fail(reason)) => Err(Self::failure(shared_call_key, reason)),
            Some(ScriptedReply::Hang) => std::future::pending().await,
            Some(ScriptedReply::Delayed(..)) | Some(ScriptedReply::Value(_)) => Err(
                ExecutionError::malformed(shared_call_key, "shared call needs scripted fields"),
            ),
            None => Err(ExecutionError::upstream(shared_call_key, "no scripted reply")),
        }
    }
}
