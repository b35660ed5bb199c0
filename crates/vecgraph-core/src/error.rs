use thiserror::Error;

use crate::config::ConfigError;

/// Top-level error type for the vecgraph workspace.
///
/// Subsystem crates define their own error types and implement
/// `From<SubsystemError> for VecgraphError` (or map into the string variants)
/// so that the `?` operator works across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum VecgraphError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Embedding store error: {0}")]
    Store(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Benchmark error: {0}")]
    Benchmark(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for VecgraphError {
    fn from(err: toml::de::Error) -> Self {
        VecgraphError::Config(ConfigError::Parse(err.to_string()))
    }
}

impl From<toml::ser::Error> for VecgraphError {
    fn from(err: toml::ser::Error) -> Self {
        VecgraphError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for VecgraphError {
    fn from(err: serde_json::Error) -> Self {
        VecgraphError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for vecgraph operations.
pub type Result<T> = std::result::Result<T, VecgraphError>;
