//! Error types for the prober engine
//!
//! Probe execution and persistence failures have their own typed errors
//! (`ExecutionError`, `StoreError`) because they are contained per probe.
//! `ProberError` covers everything that stops an operation outright.

use thiserror::Error;

use crate::store::StoreError;

/// Main error type for engine operations
#[derive(Error, Debug)]
pub enum ProberError {
    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Probe catalog is inconsistent
    #[error("Registry error: {0}")]
    Registry(String),

    /// Probe identifier not present in the registry
    #[error("Unknown probe: {0}")]
    UnknownProbe(String),

    /// File access or I/O error
    #[error("File error: {0}")]
    File(String),

    /// Configuration parsing error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Result store failure outside of a run
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Metrics registration failure
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl ProberError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        ProberError::Config(msg.into())
    }

    /// Create a registry error
    pub fn registry(msg: impl Into<String>) -> Self {
        ProberError::Registry(msg.into())
    }

    /// Check if this is a user-facing error (vs internal)
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            ProberError::Config(_)
                | ProberError::Registry(_)
                | ProberError::UnknownProbe(_)
                | ProberError::File(_)
                | ProberError::Parse(_)
        )
    }
}

impl From<std::io::Error> for ProberError {
    fn from(err: std::io::Error) -> Self {
        ProberError::File(err.to_string())
    }
}

impl From<serde_yaml::Error> for ProberError {
    fn from(err: serde_yaml::Error) -> Self {
        ProberError::Parse(format!("YAML error: {}", err))
    }
}

impl From<toml::de::Error> for ProberError {
    fn from(err: toml::de::Error) -> Self {
        ProberError::Parse(format!("TOML error: {}", err))
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, ProberError>;
