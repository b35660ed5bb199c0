//! Application state shared across all route handlers.
//!
//! Each backend gets one lazily created session. Requests for the same
//! backend queue on that session's async mutex, so an adapter never serves
//! two calls at once while different backends proceed in parallel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::debug;

use vecgraph_backends::{BackendAdapter, BackendError, BackendRegistry};
use vecgraph_core::config::VecgraphConfig;
use vecgraph_eval::{RetryPolicy, RunSettings};
use vecgraph_storage::Database;
use vecgraph_store::DynEmbeddingService;

use crate::error::ApiError;

/// A backend session shared between requests.
pub type SharedSession = Arc<tokio::sync::Mutex<BackendSession>>;

/// One backend's adapter plus what the API knows about its index.
pub struct BackendSession {
    name: String,
    adapter: Option<Box<dyn BackendAdapter>>,
    /// Dimension of the last successful index request.
    pub dimension: Option<usize>,
    /// Records written by index requests since the last clear.
    pub records: usize,
}

impl BackendSession {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            adapter: None,
            dimension: None,
            records: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_connected(&self) -> bool {
        self.adapter.as_ref().is_some_and(|a| a.is_connected())
    }

    /// The adapter, built from the registry on first use.
    pub fn adapter(
        &mut self,
        registry: &BackendRegistry,
    ) -> Result<&mut Box<dyn BackendAdapter>, BackendError> {
        if self.adapter.is_none() {
            debug!(backend = %self.name, "Creating session adapter");
            self.adapter = Some(registry.create(&self.name)?);
        }
        self.adapter.as_mut().ok_or(BackendError::NotConnected)
    }

    /// Move the adapter out, e.g. to drive it through a `BenchmarkRun`.
    /// A request dropped before [`restore`](Self::restore) just leaves the
    /// session to build a fresh adapter next time.
    pub fn take(&mut self, registry: &BackendRegistry) -> Result<Box<dyn BackendAdapter>, BackendError> {
        match self.adapter.take() {
            Some(adapter) => Ok(adapter),
            None => registry.create(&self.name),
        }
    }

    pub fn restore(&mut self, adapter: Box<dyn BackendAdapter>) {
        self.adapter = Some(adapter);
    }

    /// Disconnect and forget the adapter.
    pub async fn close(&mut self) {
        if let Some(mut adapter) = self.adapter.take() {
            if let Err(e) = adapter.close().await {
                tracing::warn!(backend = %self.name, error = %e, "Failed to close adapter");
            }
        }
    }
}

/// Shared application state.
///
/// All fields use `Arc` for cheap cloning across handler tasks.
#[derive(Clone)]
pub struct AppState {
    /// Resolved configuration.
    pub config: Arc<VecgraphConfig>,
    /// Builds adapters by backend name.
    pub registry: Arc<BackendRegistry>,
    /// Per-backend sessions, created on first request.
    pub sessions: Arc<Mutex<HashMap<String, SharedSession>>>,
    /// Embeds query text for `/search`.
    pub embedder: Arc<dyn DynEmbeddingService>,
    /// Benchmark history.
    pub database: Arc<Database>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        config: VecgraphConfig,
        registry: BackendRegistry,
        embedder: Arc<dyn DynEmbeddingService>,
        database: Arc<Database>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            sessions: Arc::new(Mutex::new(HashMap::new())),
            embedder,
            database,
            start_time: Instant::now(),
        }
    }

    /// Session for `backend`, created if needed. Unknown names are a 404.
    pub fn session(&self, backend: &str) -> Result<SharedSession, ApiError> {
        let key = backend.trim().to_ascii_lowercase();
        if !self.registry.contains(&key) {
            return Err(ApiError::NotFound(format!("Unknown backend '{}'", backend)));
        }
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|e| ApiError::Internal(format!("Session map poisoned: {}", e)))?;
        let session = sessions
            .entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(BackendSession::new(key))));
        Ok(Arc::clone(session))
    }

    /// Existing session for `backend` without creating one.
    pub fn existing_session(&self, backend: &str) -> Option<SharedSession> {
        self.sessions
            .lock()
            .ok()
            .and_then(|sessions| sessions.get(backend).cloned())
    }

    /// Interactive calls get the configured deadline and retries.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from(&self.config.benchmark)
    }

    pub fn run_settings(&self, batch_size: Option<usize>) -> RunSettings {
        RunSettings {
            batch_size: batch_size.unwrap_or(self.config.benchmark.batch_size).max(1),
            retry: self.retry_policy(),
        }
    }
}
