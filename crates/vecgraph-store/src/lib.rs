//! Vecgraph Store crate - the shared embedding dataset and its companions.
//!
//! Loads the precomputed embedding set (Parquet or JSON Lines), benchmark
//! queries (JSONL) and relevance judgments (TSV qrels), and provides the
//! embedding service trait used to vectorize query text.

pub mod columnar;
pub mod embedding;
pub mod error;
pub mod qrels;
pub mod queries;
pub mod set;

pub use embedding::{DynEmbeddingService, EmbeddingService, HashEmbedding};
pub use error::{Result, StoreError};
pub use qrels::load_qrels;
pub use queries::{embed_queries, filter_judged, load_queries, QuerySpec};
pub use set::EmbeddingSet;
