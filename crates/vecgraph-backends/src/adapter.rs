//! The uniform interface every vector database is driven through.

use std::time::Duration;

use async_trait::async_trait;
use vecgraph_core::config::BenchmarkConfig;
use vecgraph_core::{DistanceMetric, RankedResult, Record, UpsertReport};

use crate::error::{BackendError, Result};

/// Capability set of one vector database.
///
/// Every method takes `&mut self`: an adapter owns a single session and
/// never serves two calls at once. Methods other than `connect`, `name`,
/// `metric` and `close` fail with [`BackendError::NotConnected`] before a
/// successful `connect`.
#[async_trait]
pub trait BackendAdapter: Send {
    /// Backend name used in logs and reports.
    fn name(&self) -> &str;

    /// Distance function this adapter builds its index with.
    fn metric(&self) -> DistanceMetric;

    fn is_connected(&self) -> bool;

    /// Establish a session. Calling it on a connected adapter is a no-op.
    async fn connect(&mut self) -> Result<()>;

    /// Create the index or collection.
    ///
    /// Idempotent: an existing index with the same dimension and metric is
    /// left untouched together with its data. A different dimension or
    /// metric fails with [`BackendError::SchemaConflict`].
    async fn create_index(&mut self, dimension: usize, metric: DistanceMetric) -> Result<()>;

    /// Insert or overwrite records by id.
    ///
    /// Individually rejected records are reported in `failed`; transport
    /// errors are returned so the caller can retry the batch.
    async fn upsert_batch(&mut self, records: &[Record]) -> Result<UpsertReport>;

    /// At most `k` nearest neighbours, scores as similarity (higher first).
    async fn query_top_k(&mut self, vector: &[f32], k: usize) -> Result<RankedResult>;

    /// Drop all records and the index definition. Succeeds when nothing
    /// exists.
    async fn clear(&mut self) -> Result<()>;

    /// Release the session. Idempotent.
    async fn close(&mut self) -> Result<()>;
}

/// Deadlines applied by adapters to their own client calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientTimeouts {
    pub connect: Duration,
    pub request: Duration,
}

impl Default for ClientTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            request: Duration::from_secs(60),
        }
    }
}

impl From<&BenchmarkConfig> for ClientTimeouts {
    fn from(config: &BenchmarkConfig) -> Self {
        Self {
            connect: Duration::from_secs(config.connect_timeout_secs.max(1)),
            request: Duration::from_secs(config.call_timeout_secs.max(1)),
        }
    }
}

/// Reason a record cannot be stored in an index of `dimension`, if any.
pub fn record_problem(record: &Record, dimension: Option<usize>) -> Option<String> {
    if record.id.is_empty() {
        return Some("empty record id".to_string());
    }
    if record.vector.is_empty() {
        return Some("empty vector".to_string());
    }
    if let Some(dimension) = dimension {
        if record.vector.len() != dimension {
            return Some(format!(
                "vector has dimension {}, index expects {}",
                record.vector.len(),
                dimension
            ));
        }
    }
    if record.vector.iter().any(|v| !v.is_finite()) {
        return Some("vector contains non-finite values".to_string());
    }
    None
}

/// Split a batch into storable records and a report pre-filled with the
/// rejected ones.
pub fn partition_records<'a>(
    records: &'a [Record],
    dimension: Option<usize>,
) -> (Vec<&'a Record>, UpsertReport) {
    let mut report = UpsertReport::default();
    let mut valid = Vec::with_capacity(records.len());
    for record in records {
        match record_problem(record, dimension) {
            Some(reason) => report.record_failure(record.id.clone(), reason),
            None => valid.push(record),
        }
    }
    (valid, report)
}

/// Validate query arguments against the index dimension when known.
pub fn check_query(vector: &[f32], k: usize, dimension: Option<usize>) -> Result<()> {
    if k == 0 {
        return Err(BackendError::InvalidInput("k must be at least 1".to_string()));
    }
    if vector.is_empty() || vector.iter().any(|v| !v.is_finite()) {
        return Err(BackendError::InvalidInput(
            "query vector must be non-empty and finite".to_string(),
        ));
    }
    if let Some(dimension) = dimension {
        if vector.len() != dimension {
            return Err(BackendError::InvalidInput(format!(
                "query vector has dimension {}, index expects {}",
                vector.len(),
                dimension
            )));
        }
    }
    Ok(())
}

/// Extra candidates fetched beyond `k` so ties at the cutoff are settled by id.
pub const FETCH_MARGIN: usize = 4;

/// Number of hits to request from a vendor for a top-`k` query.
pub fn fetch_limit(k: usize) -> usize {
    k.saturating_add(FETCH_MARGIN)
}

/// Convert a vendor distance into a similarity where higher is better.
pub fn distance_to_similarity(metric: DistanceMetric, distance: f64) -> f64 {
    match metric {
        DistanceMetric::Cosine => 1.0 - distance,
        DistanceMetric::Dot | DistanceMetric::Euclidean => -distance,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_limit_adds_margin() {
        assert_eq!(fetch_limit(1), 1 + FETCH_MARGIN);
        assert_eq!(fetch_limit(usize::MAX), usize::MAX);
    }

    #[test]
    fn test_record_problem() {
        let ok = Record::new("a", "", vec![1.0, 0.0]);
        assert!(record_problem(&ok, Some(2)).is_none());
        assert!(record_problem(&ok, None).is_none());

        let wrong_dim = Record::new("b", "", vec![1.0]);
        assert!(record_problem(&wrong_dim, Some(2)).unwrap().contains("dimension"));

        let nan = Record::new("c", "", vec![f32::NAN, 1.0]);
        assert!(record_problem(&nan, Some(2)).unwrap().contains("non-finite"));

        let no_id = Record::new("", "", vec![1.0, 1.0]);
        assert!(record_problem(&no_id, Some(2)).is_some());
    }

    #[test]
    fn test_partition_records() {
        let records = vec![
            Record::new("1", "", vec![1.0, 0.0]),
            Record::new("2", "", vec![1.0]),
            Record::new("3", "", vec![0.0, 1.0]),
        ];
        let (valid, report) = partition_records(&records, Some(2));
        assert_eq!(valid.len(), 2);
        assert_eq!(report.failed_count(), 1);
        assert_eq!(report.failed[0].id, "2");
    }

    #[test]
    fn test_check_query() {
        assert!(check_query(&[1.0, 0.0], 3, Some(2)).is_ok());
        assert!(matches!(
            check_query(&[1.0, 0.0], 0, None),
            Err(BackendError::InvalidInput(_))
        ));
        assert!(check_query(&[1.0], 3, Some(2)).is_err());
        assert!(check_query(&[], 3, None).is_err());
    }

    #[test]
    fn test_distance_to_similarity() {
        assert_eq!(distance_to_similarity(DistanceMetric::Cosine, 0.25), 0.75);
        assert_eq!(distance_to_similarity(DistanceMetric::Euclidean, 2.0), -2.0);
        assert_eq!(distance_to_similarity(DistanceMetric::Dot, -3.0), 3.0);
    }

    #[test]
    fn test_timeouts_from_config() {
        let config = BenchmarkConfig {
            connect_timeout_secs: 0,
            call_timeout_secs: 5,
            ..Default::default()
        };
        let timeouts = ClientTimeouts::from(&config);
        assert_eq!(timeouts.connect, Duration::from_secs(1));
        assert_eq!(timeouts.request, Duration::from_secs(5));
    }
}
