//! Vecgraph Eval crate - evaluation harness and retrieval metrics.
//!
//! [`BenchmarkRun`] drives a single backend through indexing, querying and
//! reporting as an explicit state machine ([`RunState`]). [`Benchmark`]
//! runs several backends against one dataset and collects a
//! [`BenchmarkReport`]; [`results`] turns reports into JSON result files.

pub mod benchmark;
pub mod error;
pub mod harness;
pub mod metrics;
pub mod results;
pub mod retry;
pub mod state;

pub use benchmark::{Benchmark, BenchmarkInputs, BenchmarkReport, BenchmarkSettings, BackendOutcome};
pub use error::{Result, RunError};
pub use harness::{BackendReport, BenchmarkRun, IndexSummary, QueryRecord, RunSettings};
pub use metrics::{LatencySummary, MetricSummary, QueryMetrics};
pub use results::ResultFile;
pub use retry::{AdapterCall, CancelToken, RetryPolicy};
pub use state::{is_valid_transition, Operation, RunState, Stage};
