//! Plain-text tables for the terminal.

use std::fmt::Write;

use vecgraph_core::RankedResult;
use vecgraph_eval::{BackendOutcome, BenchmarkReport};
use vecgraph_storage::ResultRow;

fn opt(value: Option<f64>, precision: usize) -> String {
    match value {
        Some(v) => format!("{:.*}", precision, v),
        None => "-".to_string(),
    }
}

/// One row per backend: index time, latency, retrieval quality.
pub fn benchmark_table(report: &BenchmarkReport) -> String {
    let k = report.top_k;
    let mut out = String::new();
    let _ = writeln!(
        out,
        "dataset={} model={} records={} dim={} queries={} k={}",
        report.dataset, report.model, report.records, report.dimension, report.queries, k
    );
    let _ = writeln!(
        out,
        "{:<10} {:>10} {:>9} {:>9} {:>9} {:>9} {:>9} {:>9} {:>9} {:>9}  {}",
        "backend",
        "index_s",
        "avg_ms",
        "p50_ms",
        "p95_ms",
        "qps",
        format!("R@{}", k),
        format!("nDCG@{}", k),
        format!("MRR@{}", k),
        format!("P@{}", k),
        "notes"
    );

    for outcome in &report.outcomes {
        match outcome {
            BackendOutcome::Reported(r) => {
                let mut notes = Vec::new();
                if r.partial {
                    notes.push(format!("partial {}/{}", r.queries_answered, r.queries_total));
                }
                if let Some(failed) = r.index.as_ref().map(|i| i.upserts.failed_count()) {
                    if failed > 0 {
                        notes.push(format!("{} records rejected", failed));
                    }
                }
                let _ = writeln!(
                    out,
                    "{:<10} {:>10} {:>9.2} {:>9.2} {:>9.2} {:>9.1} {:>9.4} {:>9.4} {:>9.4} {:>9.4}  {}",
                    r.backend,
                    opt(r.index.as_ref().map(|i| i.duration_secs), 2),
                    r.latency.mean_ms,
                    r.latency.p50_ms,
                    r.latency.p95_ms,
                    r.latency.qps,
                    r.retrieval.recall,
                    r.retrieval.ndcg,
                    r.retrieval.mrr,
                    r.retrieval.precision,
                    notes.join(", ")
                );
            }
            BackendOutcome::Failed {
                backend,
                operation,
                error,
                ..
            } => {
                let during = operation.map(|op| format!(" during {}", op)).unwrap_or_default();
                let _ = writeln!(out, "{:<10} FAILED{}: {}", backend, during, error);
            }
        }
    }
    out
}

/// Stored history rows, newest first.
pub fn results_table(rows: &[ResultRow]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<20} {:<12} {:<10} {:<9} {:>8} {:>8} {:>8} {:>9} {:>9}",
        "finished", "dataset", "backend", "status", "recall", "ndcg", "mrr", "p50_ms", "qps"
    );
    for row in rows {
        let _ = writeln!(
            out,
            "{:<20} {:<12} {:<10} {:<9} {:>8} {:>8} {:>8} {:>9} {:>9}",
            row.finished_at.format("%Y-%m-%d %H:%M:%S"),
            row.dataset,
            row.backend,
            row.status,
            opt(row.recall, 4),
            opt(row.ndcg, 4),
            opt(row.mrr, 4),
            opt(row.p50_ms, 2),
            opt(row.qps, 1),
        );
    }
    out
}

/// Ranked hits of a single query.
pub fn hits_table(result: &RankedResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{:>4} {:<24} {:<24} {:>10}", "rank", "id", "doc_id", "score");
    for (rank, hit) in result.hits().iter().enumerate() {
        let _ = writeln!(
            out,
            "{:>4} {:<24} {:<24} {:>10.4}",
            rank + 1,
            hit.id,
            hit.doc_id.as_deref().unwrap_or("-"),
            hit.score
        );
    }
    out
}
