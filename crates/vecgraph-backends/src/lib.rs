//! Vecgraph Backends crate - one adapter per vector database.
//!
//! Every database is driven through the [`BackendAdapter`] trait so the
//! evaluation harness can index and query them uniformly. Vendor quirks
//! (auth headers, id formats, metric names, reply shapes) stay inside the
//! adapter modules. The [`BackendRegistry`] builds adapters by name from the
//! resolved configuration.

pub mod adapter;
pub mod error;
pub mod http;
pub mod memory;
pub mod neo4j;
pub mod pgvector;
pub mod qdrant;
pub mod redis_stack;
pub mod registry;
pub mod weaviate;

pub use adapter::{BackendAdapter, ClientTimeouts};
pub use error::{BackendError, Result};
pub use memory::MemoryBackend;
pub use neo4j::Neo4jBackend;
pub use pgvector::PgVectorBackend;
pub use qdrant::QdrantBackend;
pub use redis_stack::RedisBackend;
pub use registry::{BackendFactory, BackendKind, BackendRegistry};
pub use weaviate::WeaviateBackend;
