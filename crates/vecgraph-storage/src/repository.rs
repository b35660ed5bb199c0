//! Benchmark history repository.
//!
//! A saved run keeps its summary columns for listing plus the full report as
//! JSON so it can be rendered again exactly as it was produced.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use vecgraph_core::error::VecgraphError;
use vecgraph_eval::{BackendOutcome, BenchmarkReport};

use crate::db::Database;

/// Default row limit for listings.
pub const DEFAULT_LIMIT: u64 = 50;

/// One backend outcome from a stored run, flattened for tables and the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub run_id: String,
    pub dataset: String,
    pub model: String,
    pub backend: String,
    /// `reported` or `failed`.
    pub status: String,
    pub metric: Option<String>,
    pub partial: bool,
    pub k: Option<usize>,
    pub recall: Option<f64>,
    pub ndcg: Option<f64>,
    pub mrr: Option<f64>,
    pub precision: Option<f64>,
    pub queries_answered: usize,
    pub mean_ms: Option<f64>,
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub qps: Option<f64>,
    pub index_secs: Option<f64>,
    pub upserted: Option<usize>,
    pub failed_records: Option<usize>,
    pub operation: Option<String>,
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

/// Summary of one stored run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRow {
    pub id: String,
    pub dataset: String,
    pub model: String,
    pub records: usize,
    pub dimension: usize,
    pub queries: usize,
    pub top_k: usize,
    pub backends: usize,
    pub failed: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Filters for [`ResultRepository::list`].
#[derive(Debug, Clone, Default)]
pub struct ResultFilters {
    pub backend: Option<String>,
    pub dataset: Option<String>,
    pub limit: Option<u64>,
}

/// Repository for stored benchmark reports.
pub struct ResultRepository {
    db: Arc<Database>,
}

impl ResultRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Store a report and all of its backend outcomes in one transaction.
    /// Returns the new run id.
    pub fn save(&self, report: &BenchmarkReport) -> Result<Uuid, VecgraphError> {
        let run_id = Uuid::new_v4();
        let report_json = serde_json::to_string(report)?;

        self.db.with_conn_mut(|conn| {
            let tx = conn.transaction().map_err(db_err)?;
            tx.execute(
                "INSERT INTO benchmark_runs (id, dataset, model, records, dimension, queries,
                     top_k, batch_size, normalized, started_at, finished_at, report_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    run_id.to_string(),
                    report.dataset,
                    report.model,
                    report.records as i64,
                    report.dimension as i64,
                    report.queries as i64,
                    report.top_k as i64,
                    report.batch_size as i64,
                    report.normalized,
                    report.started_at.timestamp_millis(),
                    report.finished_at.timestamp_millis(),
                    report_json,
                ],
            )
            .map_err(|e| VecgraphError::Storage(format!("Failed to save run: {}", e)))?;

            for (position, outcome) in report.outcomes.iter().enumerate() {
                insert_outcome(&tx, &run_id, position, outcome)?;
            }

            tx.commit().map_err(db_err)?;
            Ok(())
        })?;

        info!(
            run_id = %run_id,
            dataset = %report.dataset,
            backends = report.outcomes.len(),
            "Benchmark run stored"
        );
        Ok(run_id)
    }

    /// Backend outcomes, newest run first, in request order within a run.
    pub fn list(&self, filters: &ResultFilters) -> Result<Vec<ResultRow>, VecgraphError> {
        let limit = filters.limit.unwrap_or(DEFAULT_LIMIT);
        debug!(backend = ?filters.backend, dataset = ?filters.dataset, limit, "Listing stored results");

        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT r.run_id, b.dataset, b.model, r.backend, r.status, r.metric, r.partial,
                            r.k, r.recall, r.ndcg, r.mrr, r.precision, r.queries_answered,
                            r.mean_ms, r.p50_ms, r.p95_ms, r.qps, r.index_secs,
                            r.inserted, r.updated, r.failed_records, r.operation, r.error,
                            b.finished_at
                     FROM backend_results r
                     JOIN benchmark_runs b ON b.id = r.run_id
                     WHERE (?1 IS NULL OR r.backend = ?1)
                       AND (?2 IS NULL OR b.dataset = ?2)
                     ORDER BY b.finished_at DESC, b.rowid DESC, r.position ASC
                     LIMIT ?3",
                )
                .map_err(db_err)?;

            let rows = stmt
                .query_map(
                    params![filters.backend, filters.dataset, limit as i64],
                    row_to_result,
                )
                .map_err(db_err)?;

            rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
        })
    }

    /// Stored runs, newest first.
    pub fn runs(&self, limit: u64) -> Result<Vec<RunRow>, VecgraphError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT b.id, b.dataset, b.model, b.records, b.dimension, b.queries, b.top_k,
                            COUNT(r.id),
                            COALESCE(SUM(CASE WHEN r.status = 'failed' THEN 1 ELSE 0 END), 0),
                            b.started_at, b.finished_at
                     FROM benchmark_runs b
                     LEFT JOIN backend_results r ON r.run_id = b.id
                     GROUP BY b.id
                     ORDER BY b.finished_at DESC, b.rowid DESC
                     LIMIT ?1",
                )
                .map_err(db_err)?;

            let rows = stmt
                .query_map(params![limit as i64], |row| {
                    Ok(RunRow {
                        id: row.get(0)?,
                        dataset: row.get(1)?,
                        model: row.get(2)?,
                        records: row.get::<_, i64>(3)? as usize,
                        dimension: row.get::<_, i64>(4)? as usize,
                        queries: row.get::<_, i64>(5)? as usize,
                        top_k: row.get::<_, i64>(6)? as usize,
                        backends: row.get::<_, i64>(7)? as usize,
                        failed: row.get::<_, i64>(8)? as usize,
                        started_at: from_millis(row.get(9)?),
                        finished_at: from_millis(row.get(10)?),
                    })
                })
                .map_err(db_err)?;

            rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
        })
    }

    /// The full report as it was saved.
    pub fn find_report(&self, run_id: &str) -> Result<Option<BenchmarkReport>, VecgraphError> {
        let json: Option<String> = self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT report_json FROM benchmark_runs WHERE id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)
        })?;

        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Delete a run and its backend rows. Returns false if it did not exist.
    pub fn delete(&self, run_id: &str) -> Result<bool, VecgraphError> {
        let deleted = self.db.with_conn(|conn| {
            conn.execute("DELETE FROM benchmark_runs WHERE id = ?1", params![run_id])
                .map_err(db_err)
        })?;
        Ok(deleted > 0)
    }
}

fn insert_outcome(
    tx: &rusqlite::Transaction<'_>,
    run_id: &Uuid,
    position: usize,
    outcome: &BackendOutcome,
) -> Result<(), VecgraphError> {
    let sql = "INSERT INTO backend_results (run_id, position, backend, status, metric, partial, k,
                   recall, ndcg, mrr, precision, queries_answered, mean_ms, p50_ms, p95_ms, qps,
                   index_secs, inserted, updated, failed_records, operation, error)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                   ?17, ?18, ?19, ?20, ?21, ?22)";

    let result = match outcome {
        BackendOutcome::Reported(report) => {
            let index = report.index.as_ref();
            tx.execute(
                sql,
                params![
                    run_id.to_string(),
                    position as i64,
                    report.backend,
                    "reported",
                    report.metric.as_str(),
                    report.partial,
                    report.retrieval.k as i64,
                    report.retrieval.recall,
                    report.retrieval.ndcg,
                    report.retrieval.mrr,
                    report.retrieval.precision,
                    report.queries_answered as i64,
                    report.latency.mean_ms,
                    report.latency.p50_ms,
                    report.latency.p95_ms,
                    report.latency.qps,
                    index.map(|i| i.duration_secs),
                    index.map(|i| i.upserts.inserted as i64),
                    index.map(|i| i.upserts.updated as i64),
                    index.map(|i| i.upserts.failed_count() as i64),
                    None::<String>,
                    None::<String>,
                ],
            )
        }
        BackendOutcome::Failed {
            backend,
            operation,
            error,
            index,
            queries_answered,
        } => {
            let index = index.as_ref();
            tx.execute(
                sql,
                params![
                    run_id.to_string(),
                    position as i64,
                    backend,
                    "failed",
                    None::<String>,
                    false,
                    None::<i64>,
                    None::<f64>,
                    None::<f64>,
                    None::<f64>,
                    None::<f64>,
                    *queries_answered as i64,
                    None::<f64>,
                    None::<f64>,
                    None::<f64>,
                    None::<f64>,
                    index.map(|i| i.duration_secs),
                    index.map(|i| i.upserts.inserted as i64),
                    index.map(|i| i.upserts.updated as i64),
                    index.map(|i| i.upserts.failed_count() as i64),
                    operation.as_ref().map(|op| op.as_str()),
                    error,
                ],
            )
        }
    };

    result
        .map(|_| ())
        .map_err(|e| VecgraphError::Storage(format!("Failed to save backend result: {}", e)))
}

fn row_to_result(row: &Row<'_>) -> rusqlite::Result<ResultRow> {
    let inserted: Option<i64> = row.get(18)?;
    let updated: Option<i64> = row.get(19)?;
    let upserted = match (inserted, updated) {
        (Some(i), Some(u)) => Some((i + u) as usize),
        _ => None,
    };

    Ok(ResultRow {
        run_id: row.get(0)?,
        dataset: row.get(1)?,
        model: row.get(2)?,
        backend: row.get(3)?,
        status: row.get(4)?,
        metric: row.get(5)?,
        partial: row.get(6)?,
        k: row.get::<_, Option<i64>>(7)?.map(|k| k as usize),
        recall: row.get(8)?,
        ndcg: row.get(9)?,
        mrr: row.get(10)?,
        precision: row.get(11)?,
        queries_answered: row.get::<_, i64>(12)? as usize,
        mean_ms: row.get(13)?,
        p50_ms: row.get(14)?,
        p95_ms: row.get(15)?,
        qps: row.get(16)?,
        index_secs: row.get(17)?,
        upserted,
        failed_records: row.get::<_, Option<i64>>(20)?.map(|n| n as usize),
        operation: row.get(21)?,
        error: row.get(22)?,
        finished_at: from_millis(row.get(23)?),
    })
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn db_err(e: rusqlite::Error) -> VecgraphError {
    VecgraphError::Storage(e.to_string())
}
