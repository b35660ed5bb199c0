//! API error types and JSON error response formatting.
//!
//! ApiError provides a consistent JSON error response format across all
//! endpoints. Backend failures keep the backend name and operation in
//! `details` so the UI can show which database refused what.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;

use vecgraph_backends::BackendError;
use vecgraph_core::VecgraphError;
use vecgraph_eval::{Operation, RunError};
use vecgraph_store::StoreError;

/// JSON error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code (e.g., "bad_request", "not_found").
    pub error: String,
    /// Human-readable error message.
    pub message: String,
    /// Optional structured details about the error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// API error type that maps to HTTP status codes and JSON responses.
#[derive(Debug)]
pub enum ApiError {
    /// 400 Bad Request - missing or invalid parameters.
    BadRequest(String),
    /// 404 Not Found - unknown backend or run.
    NotFound(String),
    /// 422 Unprocessable Entity - the source file could not be used.
    UnprocessableEntity(String),
    /// 500 Internal Server Error - unexpected server error.
    Internal(String),
    /// A backend call failed; status depends on the error kind.
    Backend {
        backend: String,
        operation: Option<Operation>,
        error: BackendError,
    },
}

impl ApiError {
    pub fn backend(backend: &str, operation: Option<Operation>, error: BackendError) -> Self {
        ApiError::Backend {
            backend: backend.to_string(),
            operation,
            error,
        }
    }
}

fn backend_status(error: &BackendError) -> (StatusCode, &'static str) {
    match error {
        BackendError::UnknownBackend(_) => (StatusCode::NOT_FOUND, "not_found"),
        BackendError::Config(_) | BackendError::InvalidInput(_) => {
            (StatusCode::BAD_REQUEST, "bad_request")
        }
        BackendError::SchemaConflict(_) => (StatusCode::CONFLICT, "schema_conflict"),
        BackendError::Connection(_) | BackendError::NotConnected => {
            (StatusCode::SERVICE_UNAVAILABLE, "backend_unavailable")
        }
        BackendError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "backend_timeout"),
        BackendError::Request(_) | BackendError::Protocol(_) => {
            (StatusCode::BAD_GATEWAY, "backend_error")
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg, None),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg, None),
            ApiError::UnprocessableEntity(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "unprocessable_entity",
                msg,
                None,
            ),
            ApiError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg, None)
            }
            ApiError::Backend {
                backend,
                operation,
                error,
            } => {
                let (status, code) = backend_status(&error);
                let details = json!({
                    "backend": backend,
                    "operation": operation.map(|op| op.as_str()),
                    "retryable": error.is_retryable(),
                });
                (status, code, error.to_string(), Some(details))
            }
        };

        let body = ErrorBody {
            error: error_code.to_string(),
            message,
            details,
        };

        (status, Json(body)).into_response()
    }
}

impl From<RunError> for ApiError {
    fn from(err: RunError) -> Self {
        match err {
            RunError::Backend {
                backend,
                operation,
                source,
            } => ApiError::Backend {
                backend,
                operation: Some(operation),
                error: source,
            },
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Io(e) => ApiError::BadRequest(format!("Cannot read source: {}", e)),
            StoreError::Embedding(msg) => ApiError::Internal(msg),
            other => ApiError::UnprocessableEntity(other.to_string()),
        }
    }
}

impl From<VecgraphError> for ApiError {
    fn from(err: VecgraphError) -> Self {
        match &err {
            VecgraphError::Config(e) => ApiError::BadRequest(e.to_string()),
            VecgraphError::Store(msg) => ApiError::UnprocessableEntity(msg.clone()),
            VecgraphError::Storage(msg) => ApiError::Internal(msg.clone()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}
