//! Vecgraph API crate - axum HTTP server and route handlers.
//!
//! Exposes indexing, search and clearing against any registered backend for
//! the external UI, plus the backend list, stored benchmark results and a
//! health check.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::{AppState, BackendSession};
