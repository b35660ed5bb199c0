//! Retrieval quality and latency metrics.
//!
//! Relevance is binary: a ranked document is either in the judged relevant
//! set or it is not. All rank-based metrics look only at the first `k`
//! entries of the ranking.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Number of ranked ids that are relevant, within the top `k`.
fn hits_at_k<S: AsRef<str>>(ranked: &[S], relevant: &HashSet<String>, k: usize) -> usize {
    ranked
        .iter()
        .take(k)
        .filter(|id| relevant.contains(id.as_ref()))
        .count()
}

/// Fraction of the relevant documents found in the top `k`.
///
/// Returns 0 when `relevant` is empty.
pub fn recall_at_k<S: AsRef<str>>(ranked: &[S], relevant: &HashSet<String>, k: usize) -> f64 {
    if relevant.is_empty() {
        return 0.0;
    }
    hits_at_k(ranked, relevant, k) as f64 / relevant.len() as f64
}

/// Fraction of the top `k` slots holding a relevant document.
pub fn precision_at_k<S: AsRef<str>>(ranked: &[S], relevant: &HashSet<String>, k: usize) -> f64 {
    if k == 0 {
        return 0.0;
    }
    hits_at_k(ranked, relevant, k) as f64 / k as f64
}

/// Reciprocal rank of the first relevant document in the top `k`, or 0.
pub fn mrr_at_k<S: AsRef<str>>(ranked: &[S], relevant: &HashSet<String>, k: usize) -> f64 {
    ranked
        .iter()
        .take(k)
        .position(|id| relevant.contains(id.as_ref()))
        .map(|i| 1.0 / (i + 1) as f64)
        .unwrap_or(0.0)
}

/// Normalized discounted cumulative gain with binary gains.
///
/// DCG sums `1 / log2(rank + 1)` over relevant hits; the ideal DCG places
/// `min(|relevant|, k)` relevant documents first. Returns 0 when the ideal
/// DCG is 0.
pub fn ndcg_at_k<S: AsRef<str>>(ranked: &[S], relevant: &HashSet<String>, k: usize) -> f64 {
    let discount = |rank: usize| 1.0 / ((rank + 1) as f64).log2();

    let dcg: f64 = ranked
        .iter()
        .take(k)
        .enumerate()
        .filter(|(_, id)| relevant.contains(id.as_ref()))
        .map(|(i, _)| discount(i + 1))
        .sum();
    let idcg: f64 = (1..=relevant.len().min(k)).map(discount).sum();

    if idcg == 0.0 {
        0.0
    } else {
        dcg / idcg
    }
}

/// Metric values for a single query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QueryMetrics {
    pub recall: f64,
    pub ndcg: f64,
    pub mrr: f64,
    pub precision: f64,
}

impl QueryMetrics {
    pub fn compute<S: AsRef<str>>(ranked: &[S], relevant: &HashSet<String>, k: usize) -> Self {
        Self {
            recall: recall_at_k(ranked, relevant, k),
            ndcg: ndcg_at_k(ranked, relevant, k),
            mrr: mrr_at_k(ranked, relevant, k),
            precision: precision_at_k(ranked, relevant, k),
        }
    }
}

/// Arithmetic means over the evaluated queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub k: usize,
    /// Queries that contributed to the means.
    pub queries: usize,
    pub recall: f64,
    pub ndcg: f64,
    pub mrr: f64,
    pub precision: f64,
}

impl MetricSummary {
    /// Average per-query values. An empty slice yields all zeros.
    pub fn aggregate(values: &[QueryMetrics], k: usize) -> Self {
        if values.is_empty() {
            return Self {
                k,
                ..Self::default()
            };
        }
        let n = values.len() as f64;
        let mean = |f: fn(&QueryMetrics) -> f64| values.iter().map(f).sum::<f64>() / n;
        Self {
            k,
            queries: values.len(),
            recall: mean(|m| m.recall),
            ndcg: mean(|m| m.ndcg),
            mrr: mean(|m| m.mrr),
            precision: mean(|m| m.precision),
        }
    }
}

/// Percentile of ascending `sorted` values by linear interpolation between
/// closest ranks. Returns 0 for an empty slice.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let position = (p.clamp(0.0, 100.0) / 100.0) * (n - 1) as f64;
            let lower = position.floor() as usize;
            let upper = position.ceil() as usize;
            let fraction = position - lower as f64;
            sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
        }
    }
}

/// Query latency distribution in milliseconds, plus throughput.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub count: usize,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p90_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    /// Queries per second over the wall-clock time of the query phase.
    pub qps: f64,
}

impl LatencySummary {
    pub fn from_durations(latencies: &[Duration], wall: Duration) -> Self {
        if latencies.is_empty() {
            return Self::default();
        }
        let mut ms: Vec<f64> = latencies.iter().map(|d| d.as_secs_f64() * 1000.0).collect();
        ms.sort_by(f64::total_cmp);

        let wall_secs = wall.as_secs_f64();
        Self {
            count: ms.len(),
            mean_ms: ms.iter().sum::<f64>() / ms.len() as f64,
            p50_ms: percentile(&ms, 50.0),
            p90_ms: percentile(&ms, 90.0),
            p95_ms: percentile(&ms, 95.0),
            p99_ms: percentile(&ms, 99.0),
            qps: if wall_secs > 0.0 {
                ms.len() as f64 / wall_secs
            } else {
                0.0
            },
        }
    }
}
