//! Prober configuration
//!
//! Loaded from YAML or TOML (by file extension), then overridden by
//! `PROBER_*` environment variables. Every section has defaults, so an empty
//! file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ProberError, Result};
use crate::eviction::EvictionPolicy;
use crate::gateway::HttpExecutorConfig;
use crate::orchestrator::OrchestratorSettings;
use crate::registry::{ProbeDefinition, ProbeRegistry};
use crate::store::{MemoryResultStore, ResultStore, SledResultStore};

/// Run settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Wall-clock deadline for one pass
    pub deadline_secs: u64,

    /// Interval of the recurring run schedule
    pub schedule_interval_secs: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            deadline_secs: 60,
            schedule_interval_secs: 24 * 60 * 60,
        }
    }
}

/// Eviction settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvictionConfig {
    pub interval_secs: u64,
    pub jitter_secs: u64,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            interval_secs: 24 * 60 * 60,
            jitter_secs: 24 * 60 * 60,
        }
    }
}

/// Result store backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreConfig {
    Memory,
    Sled { path: PathBuf },
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Memory
    }
}

/// HTTP server settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8083,
        }
    }
}

/// Complete prober configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProberConfig {
    /// Key namespace in the result store
    pub namespace: String,
    pub run: RunConfig,
    pub eviction: EvictionConfig,
    pub executor: HttpExecutorConfig,
    pub store: StoreConfig,
    pub server: ServerConfig,

    /// Replaces the built-in catalog when present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probes: Option<Vec<ProbeDefinition>>,
}

impl Default for ProberConfig {
    fn default() -> Self {
        Self {
            namespace: "prober".to_string(),
            run: RunConfig::default(),
            eviction: EvictionConfig::default(),
            executor: HttpExecutorConfig::default(),
            store: StoreConfig::default(),
            server: ServerConfig::default(),
            probes: None,
        }
    }
}

impl ProberConfig {
    /// Load a configuration file (`.yaml`, `.yml` or `.toml`)
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml(&content),
            Some("toml") => Self::from_toml(&content),
            other => Err(ProberError::config(format!(
                "unsupported config extension {:?} for {}",
                other.unwrap_or(""),
                path.display()
            ))),
        }
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `PROBER_*` overrides from the process environment
    pub fn apply_env(self) -> Result<Self> {
        self.apply_vars(std::env::vars())
    }

    /// Apply `PROBER_*` overrides from the given variables
    pub fn apply_vars<I>(mut self, vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            match name.as_str() {
                "PROBER_NAMESPACE" => self.namespace = value,
                "PROBER_EXECUTOR_URL" => self.executor.base_url = value,
                "PROBER_EXECUTOR_TIMEOUT_MS" => self.executor.timeout_ms = parse_num(&name, &value)?,
                "PROBER_RUN_DEADLINE_SECS" => self.run.deadline_secs = parse_num(&name, &value)?,
                "PROBER_RUN_INTERVAL_SECS" => {
                    self.run.schedule_interval_secs = parse_num(&name, &value)?
                }
                "PROBER_EVICTION_INTERVAL_SECS" => {
                    self.eviction.interval_secs = parse_num(&name, &value)?
                }
                "PROBER_EVICTION_JITTER_SECS" => {
                    self.eviction.jitter_secs = parse_num(&name, &value)?
                }
                "PROBER_STORE_PATH" => {
                    self.store = StoreConfig::Sled {
                        path: PathBuf::from(value),
                    }
                }
                _ => {}
            }
        }
        Ok(self)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.namespace.trim_matches('/').trim().is_empty() {
            return Err(ProberError::config("namespace must not be empty"));
        }
        if self.run.deadline_secs == 0 {
            return Err(ProberError::config("run.deadline_secs must be positive"));
        }
        if self.run.schedule_interval_secs == 0 {
            return Err(ProberError::config(
                "run.schedule_interval_secs must be positive",
            ));
        }
        if self.eviction.interval_secs == 0 {
            return Err(ProberError::config("eviction.interval_secs must be positive"));
        }
        if self.executor.base_url.trim().is_empty() {
            return Err(ProberError::config("executor.base_url must not be empty"));
        }
        if self.executor.timeout_ms == 0 {
            return Err(ProberError::config("executor.timeout_ms must be positive"));
        }
        Ok(())
    }

    /// Probe catalog: configured probes or the built-in set
    pub fn registry(&self) -> Result<ProbeRegistry> {
        match &self.probes {
            Some(probes) => ProbeRegistry::new(probes.clone()),
            None => Ok(ProbeRegistry::builtin()),
        }
    }

    /// Open the configured result store
    pub fn open_store(&self) -> Result<Arc<dyn ResultStore>> {
        match &self.store {
            StoreConfig::Memory => Ok(Arc::new(MemoryResultStore::new(self.namespace.clone()))),
            StoreConfig::Sled { path } => {
                tracing::info!(path = %path.display(), "Opening sled result store");
                Ok(Arc::new(SledResultStore::open(path, self.namespace.clone())?))
            }
        }
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            deadline: Duration::from_secs(self.run.deadline_secs),
        }
    }

    pub fn eviction_policy(&self) -> EvictionPolicy {
        EvictionPolicy::new(
            Duration::from_secs(self.eviction.interval_secs),
            Duration::from_secs(self.eviction.jitter_secs),
        )
    }

    pub fn schedule_interval(&self) -> Duration {
        Duration::from_secs(self.run.schedule_interval_secs)
    }
}

fn parse_num(name: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| ProberError::config(format!("{} must be a positive integer, got '{}'", name, value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ProberConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.orchestrator_settings().deadline, Duration::from_secs(60));
        assert_eq!(config.eviction_policy(), EvictionPolicy::default());
        assert_eq!(config.registry().unwrap().len(), 10);
    }

    #[test]
    fn test_yaml_partial_override() {
        let yaml = r#"
namespace: acme
run:
  deadline_secs: 30
store:
  backend: sled
  path: /var/lib/prober
executor:
  base_url: http://executor.internal
"#;
        let config = ProberConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.namespace, "acme");
        assert_eq!(config.run.deadline_secs, 30);
        assert_eq!(config.run.schedule_interval_secs, 86_400);
        assert_eq!(config.executor.invoke_path, "/invoke");
        assert_eq!(
            config.store,
            StoreConfig::Sled {
                path: PathBuf::from("/var/lib/prober")
            }
        );
    }

    #[test]
    fn test_toml() {
        let toml = r#"
namespace = "prober"

[eviction]
interval_secs = 3600
jitter_secs = 0

[store]
backend = "memory"
"#;
        let config = ProberConfig::from_toml(toml).unwrap();
        assert_eq!(config.eviction.interval_secs, 3600);
        assert_eq!(config.store, StoreConfig::Memory);
    }

    #[test]
    fn test_empty_yaml_is_default() {
        assert_eq!(ProberConfig::from_yaml("  \n").unwrap(), ProberConfig::default());
    }

    #[test]
    fn test_env_overrides() {
        let vars = vec![
            ("PROBER_NAMESPACE".to_string(), "staging".to_string()),
            ("PROBER_RUN_DEADLINE_SECS".to_string(), "5".to_string()),
            ("PROBER_STORE_PATH".to_string(), "/tmp/prober".to_string()),
            ("UNRELATED".to_string(), "x".to_string()),
        ];
        let config = ProberConfig::default().apply_vars(vars).unwrap();
        assert_eq!(config.namespace, "staging");
        assert_eq!(config.run.deadline_secs, 5);
        assert!(matches!(config.store, StoreConfig::Sled { .. }));

        let bad = vec![("PROBER_RUN_DEADLINE_SECS".to_string(), "soon".to_string())];
        assert!(ProberConfig::default().apply_vars(bad).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_deadline() {
        let mut config = ProberConfig::default();
        config.run.deadline_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.is_user_error());
    }

    #[test]
    fn test_load_rejects_unknown_extension() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("prober.ini");
        std::fs::write(&path, "namespace=x").unwrap();
        assert!(ProberConfig::load(&path).is_err());

        let path = dir.path().join("prober.yaml");
        std::fs::write(&path, "namespace: x\n").unwrap();
        assert_eq!(ProberConfig::load(&path).unwrap().namespace, "x");
    }

    #[test]
    fn test_open_sled_store() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = ProberConfig {
            store: StoreConfig::Sled {
                path: dir.path().join("results"),
            },
            ..ProberConfig::default()
        };
        let store = config.open_store().unwrap();
        assert_eq!(store.namespace(), "prober");
    }
}
