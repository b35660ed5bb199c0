use thiserror::Error;
use vecgraph_backends::BackendError;
use vecgraph_core::VecgraphError;

use crate::state::{Operation, RunState};

/// Errors terminating a backend run.
#[derive(Debug, Error)]
pub enum RunError {
    /// An adapter call failed for good (after retries, where retryable).
    #[error("{backend}: {operation} failed: {source}")]
    Backend {
        backend: String,
        operation: Operation,
        #[source]
        source: BackendError,
    },

    /// The harness was driven out of order.
    #[error("{backend}: cannot go from {from} to {to}")]
    InvalidState {
        backend: String,
        from: &'static str,
        to: &'static str,
    },

    #[error("{backend}: cancelled while {state}")]
    Cancelled { backend: String, state: String },

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Serialization(#[from] serde_json::Error),
}

impl RunError {
    pub fn invalid(backend: &str, from: &RunState, to: &RunState) -> Self {
        RunError::InvalidState {
            backend: backend.to_string(),
            from: from.name(),
            to: to.name(),
        }
    }

    /// Operation to attribute the failure to in reports.
    pub fn operation(&self) -> Option<Operation> {
        match self {
            RunError::Backend { operation, .. } => Some(*operation),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, RunError>;

impl From<RunError> for VecgraphError {
    fn from(err: RunError) -> Self {
        match err {
            RunError::Io(e) => VecgraphError::Io(e),
            other => VecgraphError::Benchmark(other.to_string()),
        }
    }
}
