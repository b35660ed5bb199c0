//! Multi-backend driver.
//!
//! Runs the same embedding set and queries against several backends, one
//! after another or concurrently (one task per backend). A failing backend
//! never stops the others; it shows up as [`BackendOutcome::Failed`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{error, info};
use vecgraph_backends::{BackendAdapter, BackendRegistry};
use vecgraph_core::config::BenchmarkConfig;
use vecgraph_core::{Query, RelevanceJudgments};
use vecgraph_store::EmbeddingSet;

use crate::error::{Result, RunError};
use crate::harness::{BackendReport, BenchmarkRun, IndexSummary, RunSettings};
use crate::retry::{CancelToken, RetryPolicy};
use crate::state::{Operation, RunState};

/// Parameters shared by every backend of a benchmark.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchmarkSettings {
    pub dataset: String,
    pub model: String,
    pub top_k: usize,
    pub batch_size: usize,
    pub retry: RetryPolicy,
    pub concurrent: bool,
    /// Clear each backend before indexing.
    pub fresh: bool,
}

impl Default for BenchmarkSettings {
    fn default() -> Self {
        Self::from(&BenchmarkConfig::default())
    }
}

impl From<&BenchmarkConfig> for BenchmarkSettings {
    fn from(config: &BenchmarkConfig) -> Self {
        Self {
            dataset: config.dataset_name.clone(),
            model: config.model_name.clone(),
            top_k: config.top_k.max(1),
            batch_size: config.batch_size.max(1),
            retry: RetryPolicy::from(config),
            concurrent: config.concurrent,
            fresh: false,
        }
    }
}

impl BenchmarkSettings {
    fn run_settings(&self) -> RunSettings {
        RunSettings {
            batch_size: self.batch_size,
            retry: self.retry,
        }
    }
}

/// Read-only inputs shared across backend tasks.
#[derive(Debug, Clone)]
pub struct BenchmarkInputs {
    pub set: Arc<EmbeddingSet>,
    pub queries: Arc<Vec<Query>>,
    pub judgments: Arc<RelevanceJudgments>,
}

impl BenchmarkInputs {
    pub fn new(set: EmbeddingSet, queries: Vec<Query>, judgments: RelevanceJudgments) -> Self {
        Self {
            set: Arc::new(set),
            queries: Arc::new(queries),
            judgments: Arc::new(judgments),
        }
    }

    /// True when every vector has unit length (within a small tolerance).
    pub fn is_normalized(&self) -> bool {
        self.set.records().iter().all(|r| {
            let norm = r.vector.iter().map(|x| x * x).sum::<f32>().sqrt();
            (norm - 1.0).abs() < 1e-3
        })
    }
}

/// Result for one backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BackendOutcome {
    Reported(BackendReport),
    Failed {
        backend: String,
        /// Adapter operation that failed, when the failure came from one.
        operation: Option<Operation>,
        error: String,
        /// Whatever indexing completed before the failure.
        index: Option<IndexSummary>,
        queries_answered: usize,
    },
}

impl BackendOutcome {
    pub fn backend(&self) -> &str {
        match self {
            BackendOutcome::Reported(report) => &report.backend,
            BackendOutcome::Failed { backend, .. } => backend,
        }
    }

    pub fn report(&self) -> Option<&BackendReport> {
        match self {
            BackendOutcome::Reported(report) => Some(report),
            BackendOutcome::Failed { .. } => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, BackendOutcome::Failed { .. })
    }

    fn failed(backend: &str, operation: Option<Operation>, error: String) -> Self {
        BackendOutcome::Failed {
            backend: backend.to_string(),
            operation,
            error,
            index: None,
            queries_answered: 0,
        }
    }
}

/// Everything one benchmark produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub dataset: String,
    pub model: String,
    pub records: usize,
    pub dimension: usize,
    pub queries: usize,
    pub top_k: usize,
    pub batch_size: usize,
    pub normalized: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// One entry per requested backend, in request order.
    pub outcomes: Vec<BackendOutcome>,
}

impl BenchmarkReport {
    pub fn reported(&self) -> impl Iterator<Item = &BackendReport> {
        self.outcomes.iter().filter_map(BackendOutcome::report)
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_failed()).count()
    }
}

/// Runs a set of backends against one dataset.
#[derive(Debug, Clone)]
pub struct Benchmark {
    settings: BenchmarkSettings,
    cancel: CancelToken,
}

impl Benchmark {
    pub fn new(settings: BenchmarkSettings) -> Self {
        Self {
            settings,
            cancel: CancelToken::new(),
        }
    }

    pub fn settings(&self) -> &BenchmarkSettings {
        &self.settings
    }

    /// Token that stops every backend between chunks or queries.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Build adapters by name and run them. Names the registry cannot build
    /// are reported as failed without touching the other backends.
    pub async fn run_named(
        &self,
        registry: &BackendRegistry,
        names: &[String],
        inputs: &BenchmarkInputs,
    ) -> BenchmarkReport {
        let mut slots: Vec<std::result::Result<Box<dyn BackendAdapter>, BackendOutcome>> =
            Vec::with_capacity(names.len());
        for name in names {
            slots.push(registry.create(name).map_err(|e| {
                error!(backend = %name, error = %e, "Cannot create backend");
                BackendOutcome::failed(name, None, e.to_string())
            }));
        }
        self.run_slots(slots, inputs).await
    }

    /// Run already constructed adapters.
    pub async fn run(
        &self,
        adapters: Vec<Box<dyn BackendAdapter>>,
        inputs: &BenchmarkInputs,
    ) -> BenchmarkReport {
        self.run_slots(adapters.into_iter().map(Ok).collect(), inputs)
            .await
    }

    async fn run_slots(
        &self,
        slots: Vec<std::result::Result<Box<dyn BackendAdapter>, BackendOutcome>>,
        inputs: &BenchmarkInputs,
    ) -> BenchmarkReport {
        let started_at = Utc::now();
        info!(
            backends = slots.len(),
            records = inputs.set.len(),
            queries = inputs.queries.len(),
            concurrent = self.settings.concurrent,
            "Starting benchmark"
        );

        let outcomes = if self.settings.concurrent {
            self.run_concurrent(slots, inputs).await
        } else {
            let mut outcomes = Vec::with_capacity(slots.len());
            for slot in slots {
                outcomes.push(match slot {
                    Ok(adapter) => {
                        run_backend(adapter, self.settings.clone(), self.cancel.clone(), inputs.clone())
                            .await
                    }
                    Err(outcome) => outcome,
                });
            }
            outcomes
        };

        let report = BenchmarkReport {
            dataset: self.settings.dataset.clone(),
            model: self.settings.model.clone(),
            records: inputs.set.len(),
            dimension: inputs.set.dimension(),
            queries: inputs.queries.len(),
            top_k: self.settings.top_k,
            batch_size: self.settings.batch_size,
            normalized: inputs.is_normalized(),
            started_at,
            finished_at: Utc::now(),
            outcomes,
        };
        info!(
            reported = report.outcomes.len() - report.failed_count(),
            failed = report.failed_count(),
            "Benchmark finished"
        );
        report
    }

    async fn run_concurrent(
        &self,
        slots: Vec<std::result::Result<Box<dyn BackendAdapter>, BackendOutcome>>,
        inputs: &BenchmarkInputs,
    ) -> Vec<BackendOutcome> {
        let mut outcomes: Vec<Option<BackendOutcome>> = Vec::with_capacity(slots.len());
        let mut names = Vec::with_capacity(slots.len());
        let mut tasks = JoinSet::new();

        for (position, slot) in slots.into_iter().enumerate() {
            match slot {
                Ok(adapter) => {
                    names.push(adapter.name().to_string());
                    outcomes.push(None);
                    let settings = self.settings.clone();
                    let cancel = self.cancel.clone();
                    let inputs = inputs.clone();
                    tasks.spawn(async move {
                        (position, run_backend(adapter, settings, cancel, inputs).await)
                    });
                }
                Err(outcome) => {
                    names.push(outcome.backend().to_string());
                    outcomes.push(Some(outcome));
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((position, outcome)) => outcomes[position] = Some(outcome),
                Err(e) => error!(error = %e, "Backend task aborted"),
            }
        }

        outcomes
            .into_iter()
            .zip(names)
            .map(|(outcome, name)| {
                outcome.unwrap_or_else(|| {
                    BackendOutcome::failed(&name, None, "backend task aborted".to_string())
                })
            })
            .collect()
    }
}

async fn drive(
    run: &mut BenchmarkRun,
    inputs: &BenchmarkInputs,
    settings: &BenchmarkSettings,
) -> Result<BackendReport> {
    if settings.fresh {
        run.clear().await?;
    }
    run.index(&inputs.set).await?;
    run.run_queries(&inputs.queries).await?;
    run.report(&inputs.judgments, settings.top_k)
}

/// Index, query and report one backend, then close it.
async fn run_backend(
    adapter: Box<dyn BackendAdapter>,
    settings: BenchmarkSettings,
    cancel: CancelToken,
    inputs: BenchmarkInputs,
) -> BackendOutcome {
    let mut run = BenchmarkRun::new(adapter, settings.run_settings(), cancel);
    info!(backend = %run.backend(), "Running backend");

    let result = drive(&mut run, &inputs, &settings).await;
    run.close().await;

    let result = match result {
        Err(RunError::Cancelled { .. }) if matches!(run.state(), RunState::Cancelled { .. }) => {
            run.report(&inputs.judgments, settings.top_k)
        }
        other => other,
    };

    match result {
        Ok(report) => BackendOutcome::Reported(report),
        Err(err) => {
            error!(backend = %run.backend(), error = %err, "Backend run failed");
            BackendOutcome::Failed {
                backend: run.backend().to_string(),
                operation: err.operation(),
                error: err.to_string(),
                index: run.index_summary().cloned(),
                queries_answered: run.answered().len(),
            }
        }
    }
}
