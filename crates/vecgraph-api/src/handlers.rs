//! Route handler functions for all API endpoints.
//!
//! Each handler extracts its parameters via axum extractors, drives the
//! backend session or the results repository from AppState, and returns a
//! JSON response.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use vecgraph_backends::{BackendAdapter, BackendError};
use vecgraph_core::{RankedResult, UpsertReport};
use vecgraph_eval::{BenchmarkReport, BenchmarkRun, CancelToken, IndexSummary, Operation, RetryPolicy};
use vecgraph_storage::{ResultFilters, ResultRepository, ResultRow, RunRow};
use vecgraph_store::EmbeddingSet;

use crate::error::ApiError;
use crate::state::AppState;

/// Largest `k` a search may ask for.
pub const MAX_K: usize = 1000;

/// Largest page for result listings.
pub const MAX_LIMIT: u64 = 1000;

fn default_k() -> usize {
    5
}

// =============================================================================
// Request types
// =============================================================================

/// Request body for POST /index.
#[derive(Debug, Deserialize)]
pub struct IndexRequest {
    #[serde(alias = "db")]
    pub backend: String,
    /// Embedding file (`.parquet` or `.jsonl`) readable by the server.
    #[serde(alias = "parquet_path")]
    pub source: PathBuf,
    pub batch_size: Option<usize>,
    /// Clear the backend before indexing.
    #[serde(default)]
    pub fresh: bool,
}

/// Request body for POST /search.
#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    #[serde(alias = "db")]
    pub backend: String,
    pub text: Option<String>,
    pub vector: Option<Vec<f32>>,
    #[serde(default = "default_k")]
    pub k: usize,
}

/// Request body for POST /clear. The backend may also be given as a query
/// parameter (`?backend=` or `?db=`).
#[derive(Debug, Default, Deserialize)]
pub struct ClearRequest {
    #[serde(alias = "db")]
    pub backend: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ClearParams {
    pub backend: Option<String>,
    pub db: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResultsParams {
    pub backend: Option<String>,
    pub dataset: Option<String>,
    pub limit: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct RunsParams {
    pub limit: Option<u64>,
}

// =============================================================================
// Response types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct IndexResponse {
    pub backend: String,
    pub records: usize,
    pub dimension: usize,
    pub report: UpsertReport,
    pub duration_ms: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub backend: String,
    pub results: RankedResult,
    pub latency_ms: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClearResponse {
    pub backend: String,
    pub cleared: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BackendInfo {
    pub name: String,
    /// Every required parameter is present in the configuration.
    pub configured: bool,
    /// `idle`, `connected` or `busy`.
    pub status: String,
    pub dimension: Option<usize>,
    pub records: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BackendsResponse {
    pub backends: Vec<BackendInfo>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResultsResponse {
    pub results: Vec<ResultRow>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RunsResponse {
    pub runs: Vec<RunRow>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub backends: usize,
    pub sessions: usize,
}

// =============================================================================
// Helpers
// =============================================================================

fn millis(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

async fn load_set(source: PathBuf) -> Result<EmbeddingSet, ApiError> {
    let set = tokio::task::spawn_blocking(move || EmbeddingSet::load(&source))
        .await
        .map_err(|e| ApiError::Internal(format!("Loader task failed: {}", e)))??;
    Ok(set)
}

async fn connect(
    adapter: &mut Box<dyn BackendAdapter>,
    policy: &RetryPolicy,
) -> Result<(), BackendError> {
    if adapter.is_connected() {
        return Ok(());
    }
    policy
        .retry(Operation::Connect, adapter.as_mut(), &(), |adapter, _| {
            adapter.connect()
        })
        .await
}

async fn query(
    adapter: &mut Box<dyn BackendAdapter>,
    policy: &RetryPolicy,
    vector: &[f32],
    k: usize,
) -> Result<RankedResult, BackendError> {
    policy
        .retry(Operation::Query, adapter.as_mut(), vector, |adapter, vector| {
            adapter.query_top_k(vector, k)
        })
        .await
}

async fn index_run(
    run: &mut BenchmarkRun,
    set: &EmbeddingSet,
    fresh: bool,
) -> vecgraph_eval::Result<IndexSummary> {
    if fresh {
        run.clear().await?;
    }
    run.index(set).await
}

// =============================================================================
// Backend operations
// =============================================================================

/// POST /index - load an embedding file and upsert it into a backend.
pub async fn index(
    State(state): State<AppState>,
    Json(body): Json<IndexRequest>,
) -> Result<Json<IndexResponse>, ApiError> {
    let started = Instant::now();
    let session = state.session(&body.backend)?;
    let set = load_set(body.source.clone()).await?;

    let mut session = session.lock().await;
    let name = session.name().to_string();
    let adapter = session
        .take(&state.registry)
        .map_err(|e| ApiError::backend(&name, None, e))?;

    let mut run = BenchmarkRun::new(adapter, state.run_settings(body.batch_size), CancelToken::new());
    let outcome = index_run(&mut run, &set, body.fresh).await;
    session.restore(run.into_adapter());
    let summary = outcome?;

    if body.fresh {
        session.records = summary.upserts.inserted;
    } else {
        session.records += summary.upserts.inserted;
    }
    session.dimension = Some(summary.dimension);

    info!(
        backend = %name,
        source = %body.source.display(),
        records = summary.records,
        failed = summary.upserts.failed_count(),
        "Indexed via API"
    );

    Ok(Json(IndexResponse {
        backend: name,
        records: summary.records,
        dimension: summary.dimension,
        report: summary.upserts,
        duration_ms: millis(started),
    }))
}

/// POST /search - nearest neighbours for a text or a raw vector.
pub async fn search(
    State(state): State<AppState>,
    Json(body): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    if body.k == 0 || body.k > MAX_K {
        return Err(ApiError::BadRequest(format!(
            "'k' must be between 1 and {}",
            MAX_K
        )));
    }

    let vector = match (body.text, body.vector) {
        (Some(_), Some(_)) => {
            return Err(ApiError::BadRequest(
                "Provide either 'text' or 'vector', not both".to_string(),
            ))
        }
        (None, Some(vector)) => vector,
        (Some(text), None) if !text.trim().is_empty() => state.embedder.embed_boxed(&text).await?,
        _ => {
            return Err(ApiError::BadRequest(
                "'text' or 'vector' is required".to_string(),
            ))
        }
    };

    let session = state.session(&body.backend)?;
    let mut session = session.lock().await;
    let name = session.name().to_string();
    let policy = state.retry_policy();

    let adapter = session
        .adapter(&state.registry)
        .map_err(|e| ApiError::backend(&name, None, e))?;
    connect(adapter, &policy)
        .await
        .map_err(|e| ApiError::backend(&name, Some(Operation::Connect), e))?;

    let started = Instant::now();
    let results = query(adapter, &policy, &vector, body.k)
        .await
        .map_err(|e| ApiError::backend(&name, Some(Operation::Query), e))?;
    let latency_ms = millis(started);

    Ok(Json(SearchResponse {
        backend: name,
        results,
        latency_ms,
    }))
}

/// POST /clear - drop all records and the index of a backend.
pub async fn clear(
    State(state): State<AppState>,
    Query(params): Query<ClearParams>,
    body: Bytes,
) -> Result<Json<ClearResponse>, ApiError> {
    let request: ClearRequest = if body.is_empty() {
        ClearRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {}", e)))?
    };
    let backend = request
        .backend
        .or(params.backend)
        .or(params.db)
        .ok_or_else(|| ApiError::BadRequest("'backend' is required".to_string()))?;

    let session = state.session(&backend)?;
    let mut session = session.lock().await;
    let name = session.name().to_string();
    let adapter = session
        .take(&state.registry)
        .map_err(|e| ApiError::backend(&name, None, e))?;

    let mut run = BenchmarkRun::new(adapter, state.run_settings(None), CancelToken::new());
    let outcome = run.clear().await;
    session.restore(run.into_adapter());
    outcome?;

    session.dimension = None;
    session.records = 0;
    info!(backend = %name, "Cleared via API");

    Ok(Json(ClearResponse {
        backend: name,
        cleared: true,
    }))
}

/// GET /backends - registered backends and their session status.
pub async fn backends(State(state): State<AppState>) -> Json<BackendsResponse> {
    let configured = state.registry.configured();
    let mut backends = Vec::new();

    for name in state.registry.available() {
        let (status, dimension, records) = match state.existing_session(&name) {
            None => ("idle", None, 0),
            Some(session) => match session.try_lock() {
                Ok(session) if session.is_connected() => {
                    ("connected", session.dimension, session.records)
                }
                Ok(session) => ("idle", session.dimension, session.records),
                Err(_) => ("busy", None, 0),
            },
        };
        backends.push(BackendInfo {
            configured: configured.contains(&name),
            name,
            status: status.to_string(),
            dimension,
            records,
        });
    }

    Json(BackendsResponse { backends })
}

// =============================================================================
// Results history
// =============================================================================

/// GET /results - stored backend outcomes, newest first.
pub async fn results(
    State(state): State<AppState>,
    Query(params): Query<ResultsParams>,
) -> Result<Json<ResultsResponse>, ApiError> {
    let filters = ResultFilters {
        backend: params.backend.map(|b| b.to_ascii_lowercase()),
        dataset: params.dataset,
        limit: params.limit.map(|l| l.min(MAX_LIMIT)),
    };
    let repo = ResultRepository::new(Arc::clone(&state.database));
    let results = repo.list(&filters)?;
    Ok(Json(ResultsResponse { results }))
}

/// GET /runs - stored benchmark runs, newest first.
pub async fn runs(
    State(state): State<AppState>,
    Query(params): Query<RunsParams>,
) -> Result<Json<RunsResponse>, ApiError> {
    let limit = params.limit.unwrap_or(50).min(MAX_LIMIT);
    let repo = ResultRepository::new(Arc::clone(&state.database));
    Ok(Json(RunsResponse {
        runs: repo.runs(limit)?,
    }))
}

/// GET /runs/{run_id} - the full stored report.
pub async fn run_report(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<BenchmarkReport>, ApiError> {
    let repo = ResultRepository::new(Arc::clone(&state.database));
    repo.find_report(&run_id)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Run '{}' not found", run_id)))
}

// =============================================================================
// Health
// =============================================================================

/// GET /health - liveness and basic counters.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let sessions = state.sessions.lock().map(|s| s.len()).unwrap_or(0);
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        backends: state.registry.available().len(),
        sessions,
    })
}
