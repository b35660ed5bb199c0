//! Vecgraph Storage crate - SQLite history of benchmark runs.
//!
//! Provides a WAL-mode SQLite database with migrations and a repository
//! that records every [`BenchmarkReport`](vecgraph_eval::BenchmarkReport)
//! so past runs can be listed and compared.

pub mod db;
pub mod migrations;
pub mod repository;

pub use db::Database;
pub use repository::{ResultFilters, ResultRepository, ResultRow, RunRow};
