//! Shared plumbing for the adapters that talk to a vendor's HTTP API.

use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::adapter::ClientTimeouts;
use crate::error::{BackendError, Result};

/// Build a client carrying the connect and per-request deadlines.
pub fn build_client(timeouts: ClientTimeouts) -> Result<Client> {
    Client::builder()
        .connect_timeout(timeouts.connect)
        .timeout(timeouts.request)
        .build()
        .map_err(|e| BackendError::Config(format!("failed to build HTTP client: {}", e)))
}

/// Classify a transport error.
pub fn map_reqwest_error(err: reqwest::Error) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout(err.to_string())
    } else if err.is_connect() {
        BackendError::Connection(err.to_string())
    } else if err.is_decode() {
        BackendError::Protocol(err.to_string())
    } else if err.is_request() || err.is_body() {
        BackendError::Connection(err.to_string())
    } else {
        BackendError::Request(err.to_string())
    }
}

/// Map an HTTP error status to a backend error.
pub fn status_error(status: StatusCode, body: &str) -> BackendError {
    let message = format!("HTTP {}: {}", status.as_u16(), body.trim());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BackendError::Config(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => BackendError::Timeout(message),
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE => {
            BackendError::Connection(message)
        }
        _ => BackendError::Request(message),
    }
}

/// Pass successful responses through, turn the rest into errors.
pub async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, &body))
}

/// Check the status and decode the JSON body.
pub async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let response = check_status(response).await?;
    response
        .json::<T>()
        .await
        .map_err(|e| BackendError::Protocol(e.to_string()))
}

/// Deterministic UUID for a record id, for vendors that only accept UUIDs.
pub fn record_uuid(id: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, id.as_bytes())
}

/// Strip trailing slashes so paths can be appended with `format!`.
pub fn base_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}
