//! HTTP probe executor
//!
//! Talks to a remote probe executor service:
//! - `POST {base_url}{invoke_path}` with `{"check": "<probe id>"}`, answered
//!   by `{"compliance": "<token>"}`
//! - `GET {base_url}{shared_path}/{key}`, answered by a JSON object of fields

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use super::{normalize_compliance, ExecutionError, ProbeExecutor, SharedResponse};

/// Configuration for the HTTP executor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpExecutorConfig {
    /// Base URL of the executor service
    pub base_url: String,

    /// Path for single probe invocations
    pub invoke_path: String,

    /// Path prefix for shared calls
    pub shared_path: String,

    /// Per-call timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for HttpExecutorConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9000".to_string(),
            invoke_path: "/invoke".to_string(),
            shared_path: "/shared".to_string(),
            timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Serialize)]
struct InvokeRequest<'a> {
    check: &'a str,
}

#[derive(Debug, Deserialize)]
struct InvokeResponse {
    compliance: Option<String>,
}

/// Probe executor backed by a remote HTTP service
#[derive(Debug, Clone)]
pub struct HttpProbeExecutor {
    client: Client,
    config: HttpExecutorConfig,
}

impl HttpProbeExecutor {
    /// Create a new executor
    pub fn new(config: HttpExecutorConfig) -> Result<Self, ExecutionError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                ExecutionError::upstream(&config.base_url, format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &HttpExecutorConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn classify(target: &str, err: reqwest::Error) -> ExecutionError {
        if err.is_timeout() {
            ExecutionError::timeout(target, format!("request timed out: {}", err))
        } else if err.is_decode() {
            ExecutionError::malformed(target, format!("undecodable response: {}", err))
        } else {
            ExecutionError::upstream(target, format!("request failed: {}", err))
        }
    }

    async fn ensure_success(
        target: &str,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ExecutionError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ExecutionError::upstream(
            target,
            format!("executor returned {}: {}", status, body),
        ))
    }
}

#[async_trait]
impl ProbeExecutor for HttpProbeExecutor {
    fn name(&self) -> &str {
        "http"
    }

    async fn invoke(&self, probe_id: &str) -> Result<String, ExecutionError> {
        let response = self
            .client
            .post(self.url(&self.config.invoke_path))
            .json(&InvokeRequest { check: probe_id })
            .send()
            .await
            .map_err(|e| Self::classify(probe_id, e))?;

        let response = Self::ensure_success(probe_id, response).await?;
        let body: InvokeResponse = response
            .json()
            .await
            .map_err(|e| ExecutionError::malformed(probe_id, e.to_string()))?;

        let raw = body
            .compliance
            .ok_or_else(|| ExecutionError::malformed(probe_id, "missing 'compliance' field"))?;
        normalize_compliance(probe_id, &raw)
    }

    async fn invoke_shared(&self, shared_call_key: &str) -> Result<SharedResponse, ExecutionError> {
        let path = format!("{}/{}", self.config.shared_path, shared_call_key);
        let response = self
            .client
            .get(self.url(&path))
            .send()
            .await
            .map_err(|e| Self::classify(shared_call_key, e))?;

        let response = Self::ensure_success(shared_call_key, response).await?;
        let fields: BTreeMap<String, serde_json::Value> = response
            .json()
            .await
            .map_err(|e| ExecutionError::malformed(shared_call_key, e.to_string()))?;

        Ok(SharedResponse::new(shared_call_key, fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joins_without_double_slash() {
        let executor = HttpProbeExecutor::new(HttpExecutorConfig {
            base_url: "http://executor:9000/".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(executor.url("/invoke"), "http://executor:9000/invoke");
    }

    #[test]
    fn test_default_config() {
        let config = HttpExecutorConfig::default();
        assert_eq!(config.invoke_path, "/invoke");
        assert_eq!(config.timeout_ms, 10_000);
    }
}
