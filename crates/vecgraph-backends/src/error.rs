use thiserror::Error;
use vecgraph_core::VecgraphError;

/// Errors returned by backend adapters.
///
/// Only [`BackendError::Connection`] and [`BackendError::Timeout`] are
/// transient; the harness retries those and nothing else.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("schema conflict: {0}")]
    SchemaConflict(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("not connected")]
    NotConnected,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("request rejected: {0}")]
    Request(String),

    #[error("unexpected response: {0}")]
    Protocol(String),

    #[error("unknown backend '{0}'")]
    UnknownBackend(String),
}

impl BackendError {
    /// True for errors worth retrying after a backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BackendError::Connection(_) | BackendError::Timeout(_))
    }
}

impl From<BackendError> for VecgraphError {
    fn from(err: BackendError) -> Self {
        VecgraphError::Backend(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BackendError>;
