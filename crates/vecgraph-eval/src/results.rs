//! JSON result files, one per backend and run.
//!
//! Files are named `{dataset}__{backend}__{model}__{timestamp}.json` and
//! hold `meta`, `context`, `db`, `workload` and `metrics` sections so runs
//! from different machines can be compared side by side.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use vecgraph_core::config::BackendsConfig;

use crate::benchmark::BenchmarkReport;
use crate::error::Result;
use crate::harness::BackendReport;

pub const SCHEMA_VERSION: &str = "1.0";
pub const RUNNER: &str = "vecgraphbench@local";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMeta {
    pub schema_version: String,
    pub timestamp: DateTime<Utc>,
    pub git_commit: Option<String>,
    pub runner: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultContext {
    pub dataset: String,
    pub dataset_size: usize,
    pub queries_count: usize,
    pub model_name: String,
    pub vector_dim: usize,
    pub dtype: String,
    pub normalized: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultDb {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub collection: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workload {
    pub top_k: usize,
    pub concurrency: usize,
    pub warmup_queries: usize,
    pub batch_size: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyPercentiles {
    pub p50: Option<f64>,
    pub p90: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Performance {
    pub index_build_time_sec: Option<f64>,
    pub upsert_rate_vps: Option<f64>,
    pub records_inserted: Option<usize>,
    pub records_updated: Option<usize>,
    pub records_failed: Option<usize>,
    pub mean_latency_ms: Option<f64>,
    pub latency_ms: LatencyPercentiles,
    pub qps: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultMetrics {
    pub performance: Performance,
    /// Keyed `recall@k`, `ndcg@k`, `mrr@k`, `precision@k`.
    pub retrieval: BTreeMap<String, Option<f64>>,
}

/// One backend's result as written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultFile {
    pub meta: ResultMeta,
    pub context: ResultContext,
    pub db: ResultDb,
    pub workload: Workload,
    pub metrics: ResultMetrics,
    #[serde(default)]
    pub notes: String,
}

/// Host and index name a backend was configured with.
pub fn backend_location(config: &BackendsConfig, backend: &str) -> (String, String) {
    match backend {
        "qdrant" => (config.qdrant.url(), config.qdrant.collection.clone()),
        "weaviate" => (config.weaviate.url.clone(), config.weaviate.class_name.clone()),
        "redis" => (
            format!("{}:{}", config.redis.host, config.redis.port),
            config.redis.index_name.clone(),
        ),
        "pgvector" => (
            format!("{}:{}", config.pgvector.host, config.pgvector.port),
            config.pgvector.table.clone(),
        ),
        "neo4j" => (config.neo4j.uri.clone(), config.neo4j.index_name.clone()),
        _ => ("local".to_string(), String::new()),
    }
}

/// `all-MiniLM-L6-v2` from `sentence-transformers/all-MiniLM-L6-v2`, with
/// characters that are awkward in file names replaced.
pub fn model_file_label(model: &str) -> String {
    model
        .rsplit('/')
        .next()
        .unwrap_or(model)
        .replace([':', ' '], "_")
}

pub fn result_file_name(dataset: &str, backend: &str, model: &str, at: DateTime<Utc>) -> String {
    format!(
        "{}__{}__{}__{}.json",
        dataset,
        backend,
        model_file_label(model),
        at.format("%Y-%m-%d_%H%M%S")
    )
}

/// Short commit hash of the working directory, if it is a git checkout.
fn git_commit() -> Option<String> {
    let output = std::process::Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let commit = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!commit.is_empty()).then_some(commit)
}

impl ResultFile {
    pub fn from_report(
        run: &BenchmarkReport,
        backend: &BackendReport,
        config: &BackendsConfig,
        git_commit: Option<String>,
    ) -> Self {
        let (host, collection) = backend_location(config, &backend.backend);
        let k = backend.retrieval.k;
        let has_queries = backend.queries_answered > 0;
        let measured = |value: f64| has_queries.then_some(value);

        let mut retrieval = BTreeMap::new();
        retrieval.insert(format!("recall@{}", k), measured(backend.retrieval.recall));
        retrieval.insert(format!("ndcg@{}", k), measured(backend.retrieval.ndcg));
        retrieval.insert(format!("mrr@{}", k), measured(backend.retrieval.mrr));
        retrieval.insert(format!("precision@{}", k), measured(backend.retrieval.precision));

        let index = backend.index.as_ref();
        let latency = &backend.latency;
        Self {
            meta: ResultMeta {
                schema_version: SCHEMA_VERSION.to_string(),
                timestamp: run.finished_at,
                git_commit,
                runner: RUNNER.to_string(),
            },
            context: ResultContext {
                dataset: run.dataset.clone(),
                dataset_size: run.records,
                queries_count: backend.queries_answered,
                model_name: run.model.clone(),
                vector_dim: run.dimension,
                dtype: "float32".to_string(),
                normalized: run.normalized,
            },
            db: ResultDb {
                name: backend.backend.clone(),
                version: String::new(),
                host,
                collection,
                params: json!({ "metric": backend.metric }),
            },
            workload: Workload {
                top_k: run.top_k,
                concurrency: 1,
                warmup_queries: 0,
                batch_size: run.batch_size,
            },
            metrics: ResultMetrics {
                performance: Performance {
                    index_build_time_sec: index.map(|i| i.duration_secs),
                    upsert_rate_vps: index.map(|i| i.upsert_rate),
                    records_inserted: index.map(|i| i.upserts.inserted),
                    records_updated: index.map(|i| i.upserts.updated),
                    records_failed: index.map(|i| i.upserts.failed_count()),
                    mean_latency_ms: measured(latency.mean_ms),
                    latency_ms: LatencyPercentiles {
                        p50: measured(latency.p50_ms),
                        p90: measured(latency.p90_ms),
                        p95: measured(latency.p95_ms),
                        p99: measured(latency.p99_ms),
                    },
                    qps: measured(latency.qps),
                },
                retrieval,
            },
            notes: if backend.partial {
                "partial run (cancelled)".to_string()
            } else {
                format!("{} evaluation", run.dataset)
            },
        }
    }

    /// Write to `dir`, creating it if needed, and return the file path.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(result_file_name(
            &self.context.dataset,
            &self.db.name,
            &self.context.model_name,
            self.meta.timestamp,
        ));
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        debug!(path = %path.display(), "Wrote result file");
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Retrieval value by metric name at this file's `top_k`, e.g. `"recall"`.
    pub fn retrieval(&self, metric: &str) -> Option<f64> {
        self.metrics
            .retrieval
            .get(&format!("{}@{}", metric, self.workload.top_k))
            .copied()
            .flatten()
    }
}

/// Write one file per reported backend. Returns the written paths.
pub fn save_report(
    report: &BenchmarkReport,
    config: &BackendsConfig,
    dir: &Path,
) -> Result<Vec<PathBuf>> {
    let commit = git_commit();
    let mut paths = Vec::new();
    for backend in report.reported() {
        let file = ResultFile::from_report(report, backend, config, commit.clone());
        paths.push(file.save(dir)?);
    }
    info!(files = paths.len(), dir = %dir.display(), "Saved result files");
    Ok(paths)
}

/// All result files in `dir`, oldest first. Unreadable files are skipped.
pub fn load_result_files(dir: &Path) -> Result<Vec<(PathBuf, ResultFile)>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        match ResultFile::load(&path) {
            Ok(file) => files.push((path, file)),
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable result file"),
        }
    }
    files.sort_by(|a, b| a.1.meta.timestamp.cmp(&b.1.meta.timestamp));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::IndexSummary;
    use crate::metrics::{LatencySummary, MetricSummary};
    use chrono::TimeZone;
    use vecgraph_core::{DistanceMetric, UpsertReport};

    fn backend_report(partial: bool) -> BackendReport {
        BackendReport {
            backend: "qdrant".to_string(),
            metric: DistanceMetric::Cosine,
            index: Some(IndexSummary {
                records: 5,
                dimension: 3,
                chunks_done: 1,
                chunks_total: 1,
                upserts: UpsertReport {
                    inserted: 5,
                    updated: 0,
                    failed: Vec::new(),
                },
                duration_secs: 0.5,
                upsert_rate: 10.0,
            }),
            queries_answered: 2,
            queries_total: 2,
            retrieval: MetricSummary {
                k: 10,
                queries: 2,
                recall: 0.75,
                ndcg: 0.6,
                mrr: 0.5,
                precision: 0.1,
            },
            latency: LatencySummary {
                count: 2,
                mean_ms: 1.5,
                p50_ms: 1.5,
                p90_ms: 1.9,
                p95_ms: 1.95,
                p99_ms: 1.99,
                qps: 500.0,
            },
            partial,
        }
    }

    fn run_report() -> BenchmarkReport {
        let at = Utc.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap();
        BenchmarkReport {
            dataset: "fiqa".to_string(),
            model: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
            records: 5,
            dimension: 3,
            queries: 2,
            top_k: 10,
            batch_size: 1000,
            normalized: true,
            started_at: at,
            finished_at: at,
            outcomes: Vec::new(),
        }
    }

    #[test]
    fn test_file_name_convention() {
        let at = Utc.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(
            result_file_name("fiqa", "redis", "sentence-transformers/all-MiniLM-L6-v2", at),
            "fiqa__redis__all-MiniLM-L6-v2__2025-03-04_050607.json"
        );
        assert_eq!(model_file_label("ollama:nomic-embed"), "ollama_nomic-embed");
    }

    #[test]
    fn test_sections_and_keys() {
        let file = ResultFile::from_report(
            &run_report(),
            &backend_report(false),
            &BackendsConfig::default(),
            Some("abc123".to_string()),
        );
        let value = serde_json::to_value(&file).unwrap();
        assert_eq!(value["meta"]["runner"], RUNNER);
        assert_eq!(value["meta"]["git_commit"], "abc123");
        assert_eq!(value["context"]["vector_dim"], 3);
        assert_eq!(value["db"]["name"], "qdrant");
        assert_eq!(value["db"]["host"], "http://localhost:6333");
        assert_eq!(value["db"]["collection"], "vectors");
        assert_eq!(value["metrics"]["retrieval"]["recall@10"], 0.75);
        assert_eq!(value["metrics"]["performance"]["latency_ms"]["p95"], 1.95);
        assert_eq!(value["metrics"]["performance"]["index_build_time_sec"], 0.5);
        assert_eq!(file.retrieval("mrr"), Some(0.5));
        assert_eq!(file.notes, "fiqa evaluation");
    }

    #[test]
    fn test_no_queries_leaves_metrics_null() {
        let mut backend = backend_report(true);
        backend.queries_answered = 0;
        let file =
            ResultFile::from_report(&run_report(), &backend, &BackendsConfig::default(), None);
        assert_eq!(file.retrieval("recall"), None);
        assert!(file.metrics.performance.qps.is_none());
        assert!(file.notes.contains("partial"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let file = ResultFile::from_report(
            &run_report(),
            &backend_report(false),
            &BackendsConfig::default(),
            None,
        );
        let path = file.save(&dir.path().join("results")).unwrap();
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("fiqa__qdrant__all-MiniLM-L6-v2__"));

        let loaded = ResultFile::load(&path).unwrap();
        assert_eq!(loaded, file);

        std::fs::write(dir.path().join("results/broken.json"), "{").unwrap();
        let listed = load_result_files(&dir.path().join("results")).unwrap();
        assert_eq!(listed.len(), 1);
        assert!(load_result_files(&dir.path().join("missing")).unwrap().is_empty());
    }
}
