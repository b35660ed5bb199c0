//! Router setup with all API routes and middleware.
//!
//! Configures the axum Router with CORS, tracing, compression, and all
//! endpoint handlers.

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use vecgraph_core::error::VecgraphError;

use crate::handlers;
use crate::state::AppState;

/// Port the UI dev server runs on.
const UI_DEV_PORT: u16 = 3000;

fn allowed_origins(port: u16) -> Vec<HeaderValue> {
    [port, UI_DEV_PORT]
        .iter()
        .flat_map(|p| [format!("http://127.0.0.1:{}", p), format!("http://localhost:{}", p)])
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect()
}

/// Create the axum Router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins(state.config.general.port)))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/backends", get(handlers::backends))
        .route("/index", post(handlers::index))
        .route("/search", post(handlers::search))
        .route("/clear", post(handlers::clear))
        .route("/results", get(handlers::results))
        .route("/runs", get(handlers::runs))
        .route("/runs/{run_id}", get(handlers::run_report))
        // Raw query vectors can be large.
        .layer(DefaultBodyLimit::max(8 * 1024 * 1024))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server.
///
/// Binds to 127.0.0.1 (localhost only) on the configured port.
pub async fn start_server(state: AppState) -> Result<(), VecgraphError> {
    let addr = format!("127.0.0.1:{}", state.config.general.port);
    let router = create_router(state);

    tracing::info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
