//! Probe executor gateway
//!
//! Boundary to the external probe executors. Independent probes are invoked
//! one by one; shared-derived probes read disjoint fields of one shared
//! upstream response.

mod fakes;
mod http;

pub use fakes::{ScriptedReply, StaticExecutor};
pub use http::{HttpExecutorConfig, HttpProbeExecutor};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::registry::{CompliantWhen, ProbeDefinition};

/// Why a probe execution failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Upstream did not answer in time
    Timeout,
    /// Upstream answered with an error
    Upstream,
    /// Upstream answer could not be interpreted
    Malformed,
}

impl FailureReason {
    /// Stable reason code
    pub fn code(&self) -> &'static str {
        match self {
            FailureReason::Timeout => "timeout",
            FailureReason::Upstream => "upstream_error",
            FailureReason::Malformed => "malformed_response",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Failure of a probe invocation or of a shared call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason} for '{target}': {message}")]
pub struct ExecutionError {
    /// Probe id or shared call key
    pub target: String,
    pub reason: FailureReason,
    pub message: String,
}

impl ExecutionError {
    pub fn new(target: impl Into<String>, reason: FailureReason, message: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            reason,
            message: message.into(),
        }
    }

    pub fn timeout(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(target, FailureReason::Timeout, message)
    }

    pub fn upstream(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(target, FailureReason::Upstream, message)
    }

    pub fn malformed(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(target, FailureReason::Malformed, message)
    }
}

/// Normalized compliance tokens
pub const COMPLIANT: &str = "COMPLIANT";
pub const NON_COMPLIANT: &str = "NON_COMPLIANT";
pub const NOT_APPLICABLE: &str = "NOT_APPLICABLE";

/// Normalize an executor answer into a compliance token.
///
/// Case is ignored and `-` is read as `_`. Anything outside the three
/// tokens is a malformed response.
pub fn normalize_compliance(probe_id: &str, raw: &str) -> Result<String, ExecutionError> {
    let token = raw.trim().to_ascii_uppercase().replace('-', "_");
    match token.as_str() {
        COMPLIANT | NON_COMPLIANT | NOT_APPLICABLE => Ok(token),
        "" => Err(ExecutionError::malformed(probe_id, "empty compliance value")),
        _ => Err(ExecutionError::malformed(
            probe_id,
            format!("unrecognized compliance value '{}'", raw),
        )),
    }
}

/// Response of a shared upstream call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedResponse {
    /// Shared call key that produced this response
    pub key: String,

    /// Named response fields
    pub fields: BTreeMap<String, serde_json::Value>,

    /// When the response was fetched
    pub fetched_at: DateTime<Utc>,
}

impl SharedResponse {
    pub fn new(key: impl Into<String>, fields: BTreeMap<String, serde_json::Value>) -> Self {
        Self {
            key: key.into(),
            fields,
            fetched_at: Utc::now(),
        }
    }

    /// Read a boolean-like field.
    ///
    /// Booleans, numbers (non-zero is true) and the strings
    /// `true/false/1/0/yes/no` are accepted.
    pub fn flag(&self, field: &str) -> Result<bool, ExecutionError> {
        let value = self.fields.get(field).ok_or_else(|| {
            ExecutionError::malformed(&self.key, format!("missing field '{}'", field))
        })?;

        let parsed = match value {
            serde_json::Value::Bool(b) => Some(*b),
            serde_json::Value::Number(n) => n.as_f64().map(|v| v != 0.0),
            serde_json::Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Some(true),
                "false" | "0" | "no" => Some(false),
                _ => None,
            },
            _ => None,
        };

        parsed.ok_or_else(|| {
            ExecutionError::malformed(
                &self.key,
                format!("field '{}' is not boolean-like: {}", field, value),
            )
        })
    }
}

/// Derive a shared-derived probe's value from the shared response.
///
/// Pure: reads only the field named by the probe's derive rule.
pub fn derive_from_shared(
    response: &SharedResponse,
    probe: &ProbeDefinition,
) -> Result<String, ExecutionError> {
    let rule = probe.derive.as_ref().ok_or_else(|| {
        ExecutionError::malformed(&probe.id, "probe has no derive rule")
    })?;

    let flag = response
        .flag(&rule.field)
        .map_err(|e| ExecutionError::malformed(&probe.id, e.message))?;

    let compliant = match rule.compliant_when {
        CompliantWhen::Truthy => flag,
        CompliantWhen::Falsy => !flag,
    };

    Ok(if compliant { COMPLIANT } else { NON_COMPLIANT }.to_string())
}

/// External probe executor
///
/// Implementations perform no retries; a failed call is reported once.
#[async_trait]
pub trait ProbeExecutor: Send + Sync {
    /// Executor identifier for logs
    fn name(&self) -> &str;

    /// Run one independent probe and return its normalized value
    async fn invoke(&self, probe_id: &str) -> Result<String, ExecutionError>;

    /// Issue a shared upstream call
    async fn invoke_shared(&self, shared_call_key: &str) -> Result<SharedResponse, ExecutionError>;
}
