//! Single-backend evaluation run.
//!
//! A [`BenchmarkRun`] owns one adapter and walks it through
//! index -> query -> report, recording timings on the way. Adapter calls are
//! bounded by the call deadline and transient failures are retried with
//! backoff; anything else moves the run to `Failed`.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use vecgraph_backends::{BackendAdapter, BackendError};
use vecgraph_core::{DistanceMetric, Query, RankedResult, RelevanceJudgments, UpsertReport};
use vecgraph_store::EmbeddingSet;

use crate::error::{Result, RunError};
use crate::metrics::{LatencySummary, MetricSummary, QueryMetrics};
use crate::retry::{CancelToken, RetryPolicy};
use crate::state::{is_valid_transition, Operation, RunState, Stage};

/// Knobs for one backend run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSettings {
    /// Records per `upsert_batch` call.
    pub batch_size: usize,
    pub retry: RetryPolicy,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            retry: RetryPolicy::default(),
        }
    }
}

/// Outcome of the indexing phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSummary {
    /// Records in the embedding set.
    pub records: usize,
    pub dimension: usize,
    pub chunks_done: usize,
    pub chunks_total: usize,
    pub upserts: UpsertReport,
    pub duration_secs: f64,
    /// Written records per second.
    pub upsert_rate: f64,
}

impl IndexSummary {
    fn new(
        set: &EmbeddingSet,
        chunks_done: usize,
        chunks_total: usize,
        upserts: UpsertReport,
        elapsed: Duration,
    ) -> Self {
        let duration_secs = elapsed.as_secs_f64();
        let upsert_rate = if duration_secs > 0.0 {
            upserts.written() as f64 / duration_secs
        } else {
            0.0
        };
        Self {
            records: set.len(),
            dimension: set.dimension(),
            chunks_done,
            chunks_total,
            upserts,
            duration_secs,
            upsert_rate,
        }
    }

    /// False when indexing stopped before the last chunk.
    pub fn is_complete(&self) -> bool {
        self.chunks_done == self.chunks_total
    }
}

/// One answered query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRecord {
    pub query_id: String,
    pub latency: Duration,
    pub result: RankedResult,
}

/// Timings and retrieval quality of one backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendReport {
    pub backend: String,
    pub metric: DistanceMetric,
    pub index: Option<IndexSummary>,
    pub queries_answered: usize,
    pub queries_total: usize,
    pub retrieval: MetricSummary,
    pub latency: LatencySummary,
    /// Set when the run was cancelled before finishing.
    pub partial: bool,
}

/// Drives one adapter through a benchmark.
pub struct BenchmarkRun {
    name: String,
    adapter: Box<dyn BackendAdapter>,
    settings: RunSettings,
    cancel: CancelToken,
    state: RunState,
    index: Option<IndexSummary>,
    doc_ids: HashMap<String, String>,
    answered: Vec<QueryRecord>,
    queries_total: usize,
    query_wall: Duration,
}

impl std::fmt::Debug for BenchmarkRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BenchmarkRun")
            .field("backend", &self.name)
            .field("state", &self.state)
            .field("answered", &self.answered.len())
            .finish()
    }
}

impl BenchmarkRun {
    pub fn new(adapter: Box<dyn BackendAdapter>, settings: RunSettings, cancel: CancelToken) -> Self {
        Self {
            name: adapter.name().to_string(),
            adapter,
            settings,
            cancel,
            state: RunState::Idle,
            index: None,
            doc_ids: HashMap::new(),
            answered: Vec::new(),
            queries_total: 0,
            query_wall: Duration::ZERO,
        }
    }

    pub fn backend(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn index_summary(&self) -> Option<&IndexSummary> {
        self.index.as_ref()
    }

    pub fn answered(&self) -> &[QueryRecord] {
        &self.answered
    }

    fn transition(&mut self, to: RunState) -> Result<()> {
        if !is_valid_transition(&self.state, &to) {
            return Err(RunError::invalid(&self.name, &self.state, &to));
        }
        if self.state.name() != to.name() {
            debug!(backend = %self.name, from = self.state.name(), to = to.name(), "Run state change");
        }
        self.state = to;
        Ok(())
    }

    /// Record a terminal adapter failure and return it as an error.
    fn fail(&mut self, operation: Operation, source: BackendError) -> RunError {
        warn!(backend = %self.name, %operation, error = %source, "Backend operation failed");
        let failed = RunState::Failed {
            operation,
            error: source.to_string(),
        };
        if is_valid_transition(&self.state, &failed) {
            self.state = failed;
        }
        RunError::Backend {
            backend: self.name.clone(),
            operation,
            source,
        }
    }

    /// Sleep before the next attempt, or give up with the error.
    async fn retry_or_fail(
        &mut self,
        operation: Operation,
        error: BackendError,
        attempt: &mut u32,
    ) -> Result<()> {
        match self.settings.retry.next_delay(&error, *attempt) {
            Some(delay) => {
                *attempt += 1;
                warn!(
                    backend = %self.name,
                    %operation,
                    attempt = *attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Transient backend error, retrying"
                );
                tokio::time::sleep(delay).await;
                Ok(())
            }
            None => Err(self.fail(operation, error)),
        }
    }

    fn cancelled(&mut self, stage: Stage) -> RunError {
        info!(backend = %self.name, %stage, "Run cancelled");
        let state = self.state.to_string();
        self.state = RunState::Cancelled { stage };
        RunError::Cancelled {
            backend: self.name.clone(),
            state,
        }
    }

    async fn connect(&mut self) -> Result<()> {
        if self.adapter.is_connected() {
            return Ok(());
        }
        let mut attempt = 0;
        loop {
            match self.settings.retry.bounded(self.adapter.connect()).await {
                Ok(()) => return Ok(()),
                Err(e) => self.retry_or_fail(Operation::Connect, e, &mut attempt).await?,
            }
        }
    }

    /// Drop existing data and index before a fresh run. Only valid while idle.
    pub async fn clear(&mut self) -> Result<()> {
        if self.state != RunState::Idle {
            return Err(RunError::invalid(&self.name, &self.state, &RunState::Idle));
        }
        // Failures here leave the run idle.
        self.connect().await?;
        let mut attempt = 0;
        loop {
            match self.settings.retry.bounded(self.adapter.clear()).await {
                Ok(()) => break,
                Err(e) => self.retry_or_fail(Operation::Clear, e, &mut attempt).await?,
            }
        }
        info!(backend = %self.name, "Cleared backend");
        Ok(())
    }

    /// Create the index and upsert every record of `set` in chunks.
    pub async fn index(&mut self, set: &EmbeddingSet) -> Result<IndexSummary> {
        let batch_size = self.settings.batch_size.max(1);
        let chunks_total = set.chunk_count(batch_size);
        self.transition(RunState::Indexing {
            chunks_done: 0,
            chunks_total,
        })?;
        if self.cancel.is_cancelled() {
            return Err(self.cancelled(Stage::Indexing));
        }
        let started = Instant::now();

        self.connect().await?;

        let metric = self.adapter.metric();
        let mut attempt = 0;
        loop {
            match self
                .settings
                .retry
                .bounded(self.adapter.create_index(set.dimension(), metric))
                .await
            {
                Ok(()) => break,
                Err(e) => self.retry_or_fail(Operation::CreateIndex, e, &mut attempt).await?,
            }
        }

        self.doc_ids = set
            .records()
            .iter()
            .map(|r| (r.id.clone(), r.doc_id.clone()))
            .collect();

        let mut upserts = UpsertReport::default();
        let mut chunks_done = 0;
        for chunk in set.chunks(batch_size) {
            if self.cancel.is_cancelled() {
                self.index = Some(IndexSummary::new(
                    set,
                    chunks_done,
                    chunks_total,
                    upserts,
                    started.elapsed(),
                ));
                return Err(self.cancelled(Stage::Indexing));
            }

            let mut attempt = 0;
            let report = loop {
                match self.settings.retry.bounded(self.adapter.upsert_batch(chunk)).await {
                    Ok(report) => break report,
                    Err(e) => self.retry_or_fail(Operation::Upsert, e, &mut attempt).await?,
                }
            };
            if !report.failed.is_empty() {
                warn!(
                    backend = %self.name,
                    chunk = chunks_done,
                    failed = report.failed.len(),
                    "Backend rejected records"
                );
            }
            upserts.merge(report);
            chunks_done += 1;
            self.transition(RunState::Indexing {
                chunks_done,
                chunks_total,
            })?;
            debug!(backend = %self.name, chunk = chunks_done, chunks_total, "Upserted chunk");
        }

        let summary = IndexSummary::new(set, chunks_done, chunks_total, upserts, started.elapsed());
        info!(
            backend = %self.name,
            records = summary.records,
            inserted = summary.upserts.inserted,
            updated = summary.upserts.updated,
            failed = summary.upserts.failed_count(),
            secs = summary.duration_secs,
            "Indexing complete"
        );
        self.index = Some(summary.clone());
        self.transition(RunState::Ready)?;
        Ok(summary)
    }

    /// Issue every query in order, recording per-query latency.
    pub async fn run_queries(&mut self, queries: &[Query]) -> Result<()> {
        let total = queries.len();
        self.transition(RunState::Querying { answered: 0, total })?;
        self.queries_total = total;
        let started = Instant::now();

        for query in queries {
            if self.cancel.is_cancelled() {
                self.query_wall = started.elapsed();
                return Err(self.cancelled(Stage::Querying));
            }

            let mut attempt = 0;
            let (result, latency) = loop {
                let call_started = Instant::now();
                match self
                    .settings
                    .retry
                    .bounded(self.adapter.query_top_k(&query.vector, query.k))
                    .await
                {
                    Ok(result) => break (result, call_started.elapsed()),
                    Err(e) => self.retry_or_fail(Operation::Query, e, &mut attempt).await?,
                }
            };
            self.answered.push(QueryRecord {
                query_id: query.id.clone(),
                latency,
                result,
            });

            let answered = self.answered.len();
            self.transition(RunState::Querying { answered, total })?;
        }

        self.query_wall = started.elapsed();
        info!(
            backend = %self.name,
            queries = total,
            secs = self.query_wall.as_secs_f64(),
            "Queries complete"
        );
        Ok(())
    }

    /// Ranked document ids for a result: hits mapped through their document
    /// id, keeping the first occurrence of each document.
    fn ranked_doc_ids(&self, result: &RankedResult) -> Vec<String> {
        let mut seen = HashSet::new();
        result
            .hits()
            .iter()
            .map(|hit| {
                hit.doc_id
                    .clone()
                    .or_else(|| self.doc_ids.get(&hit.id).cloned())
                    .unwrap_or_else(|| hit.id.clone())
            })
            .filter(|doc| seen.insert(doc.clone()))
            .collect()
    }

    /// Score the answered queries against `judgments` at cutoff `k`.
    ///
    /// Queries without judgments, or judged with no relevant documents, are
    /// left out of the averages. A cancelled run reports what it recorded
    /// and is marked partial.
    pub fn report(&mut self, judgments: &RelevanceJudgments, k: usize) -> Result<BackendReport> {
        let partial = matches!(self.state, RunState::Cancelled { .. });
        self.transition(RunState::Reported)?;

        let per_query: Vec<QueryMetrics> = self
            .answered
            .iter()
            .filter_map(|record| {
                let relevant = judgments
                    .relevant(&record.query_id)
                    .filter(|relevant| !relevant.is_empty())?;
                let ranked = self.ranked_doc_ids(&record.result);
                Some(QueryMetrics::compute(&ranked, relevant, k))
            })
            .collect();
        let skipped = self.answered.len() - per_query.len();
        if skipped > 0 {
            debug!(backend = %self.name, skipped, "Queries without relevant documents not scored");
        }

        let latencies: Vec<Duration> = self.answered.iter().map(|r| r.latency).collect();
        let report = BackendReport {
            backend: self.name.clone(),
            metric: self.adapter.metric(),
            index: self.index.clone(),
            queries_answered: self.answered.len(),
            queries_total: self.queries_total,
            retrieval: MetricSummary::aggregate(&per_query, k),
            latency: LatencySummary::from_durations(&latencies, self.query_wall),
            partial,
        };
        info!(
            backend = %self.name,
            recall = report.retrieval.recall,
            ndcg = report.retrieval.ndcg,
            mrr = report.retrieval.mrr,
            p95_ms = report.latency.p95_ms,
            "Backend report ready"
        );
        Ok(report)
    }

    /// Release the adapter session. Errors are logged, not returned.
    pub async fn close(&mut self) {
        if let Err(e) = self.adapter.close().await {
            warn!(backend = %self.name, error = %e, "Failed to close backend");
        }
    }

    pub fn into_adapter(self) -> Box<dyn BackendAdapter> {
        self.adapter
    }
}
