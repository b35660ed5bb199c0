use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// =============================================================================
// Enums
// =============================================================================

/// Distance function an index is built with.
///
/// Each backend adapter maps this onto its own vendor naming
/// (`Cosine`/`cosine`/`COSINE`/`vector_cosine_ops`, ...).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Cosine similarity. The default for normalized sentence embeddings.
    #[default]
    Cosine,
    /// Inner (dot) product.
    Dot,
    /// Euclidean (L2) distance.
    Euclidean,
}

impl DistanceMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Dot => "dot",
            DistanceMetric::Euclidean => "euclidean",
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistanceMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" | "cos" => Ok(DistanceMetric::Cosine),
            "dot" | "ip" | "inner_product" => Ok(DistanceMetric::Dot),
            "euclidean" | "euclid" | "l2" => Ok(DistanceMetric::Euclidean),
            other => Err(format!(
                "unknown distance metric '{}'. Must be one of: cosine, dot, euclidean",
                other
            )),
        }
    }
}

// =============================================================================
// Records and queries
// =============================================================================

/// One embedded document chunk, the unit of data shared by all backends.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Unique record id.
    pub id: String,
    /// Source document id. Several records may share one document.
    pub doc_id: String,
    /// The embedded text.
    pub text: String,
    /// Embedding vector; every record of one set has the same length.
    pub vector: Vec<f32>,
}

impl Record {
    /// Create a record whose `doc_id` defaults to its `id`.
    pub fn new(id: impl Into<String>, text: impl Into<String>, vector: Vec<f32>) -> Self {
        let id = id.into();
        Self {
            doc_id: id.clone(),
            id,
            text: text.into(),
            vector,
        }
    }

    pub fn with_doc_id(mut self, doc_id: impl Into<String>) -> Self {
        self.doc_id = doc_id.into();
        self
    }

    pub fn dimension(&self) -> usize {
        self.vector.len()
    }
}

/// A benchmark query: an identifier (used to look up relevance judgments),
/// its text, its embedding and the number of neighbours requested.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub id: String,
    pub text: String,
    pub vector: Vec<f32>,
    pub k: usize,
}

impl Query {
    pub fn new(id: impl Into<String>, text: impl Into<String>, vector: Vec<f32>, k: usize) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            vector,
            k,
        }
    }
}

// =============================================================================
// Results
// =============================================================================

/// A single neighbour returned by a backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoredHit {
    /// Record id.
    pub id: String,
    /// Document id when the backend stores it alongside the vector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_id: Option<String>,
    /// Similarity score; higher is more relevant.
    pub score: f64,
}

impl ScoredHit {
    pub fn new(id: impl Into<String>, score: f64) -> Self {
        Self {
            id: id.into(),
            doc_id: None,
            score,
        }
    }

    pub fn with_doc_id(mut self, doc_id: impl Into<String>) -> Self {
        self.doc_id = Some(doc_id.into());
        self
    }
}

/// Ranked neighbours for one query: at most k hits, descending score,
/// ties broken by ascending id.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RankedResult {
    hits: Vec<ScoredHit>,
}

impl RankedResult {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Normalize raw backend hits into a ranked result.
    ///
    /// Drops NaN scores, keeps the best-scoring hit per id, orders by
    /// descending score then ascending id, and truncates to `k`.
    pub fn from_hits(mut hits: Vec<ScoredHit>, k: usize) -> Self {
        hits.retain(|h| !h.score.is_nan());
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));

        let mut seen = HashSet::new();
        hits.retain(|h| seen.insert(h.id.clone()));
        hits.truncate(k);

        Self { hits }
    }

    pub fn hits(&self) -> &[ScoredHit] {
        &self.hits
    }

    pub fn into_hits(self) -> Vec<ScoredHit> {
        self.hits
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// Record ids in rank order.
    pub fn ids(&self) -> Vec<&str> {
        self.hits.iter().map(|h| h.id.as_str()).collect()
    }
}

/// A record that a backend refused during a batch upsert.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFailure {
    pub id: String,
    pub reason: String,
}

/// Outcome of one or more `upsert_batch` calls.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertReport {
    /// Records that did not exist before.
    pub inserted: usize,
    /// Records that overwrote an existing id.
    pub updated: usize,
    /// Records rejected individually; the rest of the batch still applied.
    pub failed: Vec<RecordFailure>,
}

impl UpsertReport {
    pub fn record_failure(&mut self, id: impl Into<String>, reason: impl Into<String>) {
        self.failed.push(RecordFailure {
            id: id.into(),
            reason: reason.into(),
        });
    }

    /// Fold another report (usually the next chunk) into this one.
    pub fn merge(&mut self, other: UpsertReport) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.failed.extend(other.failed);
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    /// Records that were written (inserted or updated).
    pub fn written(&self) -> usize {
        self.inserted + self.updated
    }

    pub fn processed(&self) -> usize {
        self.written() + self.failed.len()
    }
}

// =============================================================================
// Relevance judgments
// =============================================================================

/// Ground truth: for each query id, the set of relevant document ids.
///
/// Relevance is binary. A query may be judged with an empty relevant set,
/// which is different from not being judged at all.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelevanceJudgments {
    judgments: HashMap<String, HashSet<String>>,
}

impl RelevanceJudgments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `doc_id` as relevant for `query_id`.
    pub fn insert(&mut self, query_id: impl Into<String>, doc_id: impl Into<String>) {
        self.judgments
            .entry(query_id.into())
            .or_default()
            .insert(doc_id.into());
    }

    /// Record that `query_id` was judged, without adding relevant documents.
    pub fn mark_judged(&mut self, query_id: impl Into<String>) {
        self.judgments.entry(query_id.into()).or_default();
    }

    pub fn relevant(&self, query_id: &str) -> Option<&HashSet<String>> {
        self.judgments.get(query_id)
    }

    pub fn is_judged(&self, query_id: &str) -> bool {
        self.judgments.contains_key(query_id)
    }

    pub fn len(&self) -> usize {
        self.judgments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.judgments.is_empty()
    }

    pub fn query_ids(&self) -> impl Iterator<Item = &str> {
        self.judgments.keys().map(String::as_str)
    }
}

impl<Q: Into<String>, D: Into<String>> FromIterator<(Q, D)> for RelevanceJudgments {
    fn from_iter<I: IntoIterator<Item = (Q, D)>>(iter: I) -> Self {
        let mut judgments = RelevanceJudgments::new();
        for (query_id, doc_id) in iter {
            judgments.insert(query_id, doc_id);
        }
        judgments
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_doc_id_defaults_to_id() {
        let record = Record::new("42", "text", vec![0.1, 0.2]);
        assert_eq!(record.doc_id, "42");
        assert_eq!(record.dimension(), 2);

        let record = record.with_doc_id("doc-7");
        assert_eq!(record.doc_id, "doc-7");
        assert_eq!(record.id, "42");
    }

    #[test]
    fn test_distance_metric_parse() {
        assert_eq!("cosine".parse::<DistanceMetric>().unwrap(), DistanceMetric::Cosine);
        assert_eq!("IP".parse::<DistanceMetric>().unwrap(), DistanceMetric::Dot);
        assert_eq!("l2".parse::<DistanceMetric>().unwrap(), DistanceMetric::Euclidean);
        assert!("manhattan".parse::<DistanceMetric>().is_err());
    }

    #[test]
    fn test_distance_metric_serde() {
        let json = serde_json::to_string(&DistanceMetric::Euclidean).unwrap();
        assert_eq!(json, "\"euclidean\"");
        let back: DistanceMetric = serde_json::from_str("\"dot\"").unwrap();
        assert_eq!(back, DistanceMetric::Dot);
    }

    #[test]
    fn test_ranked_result_orders_by_score_then_id() {
        let hits = vec![
            ScoredHit::new("b", 0.5),
            ScoredHit::new("c", 0.9),
            ScoredHit::new("a", 0.5),
            ScoredHit::new("d", 0.1),
        ];
        let ranked = RankedResult::from_hits(hits, 10);
        assert_eq!(ranked.ids(), vec!["c", "a", "b", "d"]);
    }

    #[test]
    fn test_ranked_result_truncates_to_k() {
        let hits = (0..10)
            .map(|i| ScoredHit::new(format!("{}", i), i as f64))
            .collect();
        let ranked = RankedResult::from_hits(hits, 3);
        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked.ids(), vec!["9", "8", "7"]);
    }

    #[test]
    fn test_ranked_result_dedups_and_drops_nan() {
        let hits = vec![
            ScoredHit::new("a", 0.2),
            ScoredHit::new("a", 0.8),
            ScoredHit::new("b", f64::NAN),
        ];
        let ranked = RankedResult::from_hits(hits, 5);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked.hits()[0].score, 0.8);
    }

    #[test]
    fn test_ranked_result_serializes_as_list() {
        let ranked = RankedResult::from_hits(vec![ScoredHit::new("x", 1.0).with_doc_id("d")], 1);
        let json = serde_json::to_value(&ranked).unwrap();
        assert_eq!(json, serde_json::json!([{"id": "x", "doc_id": "d", "score": 1.0}]));
    }

    #[test]
    fn test_upsert_report_merge() {
        let mut total = UpsertReport {
            inserted: 3,
            updated: 1,
            failed: vec![],
        };
        let mut chunk = UpsertReport {
            inserted: 2,
            ..Default::default()
        };
        chunk.record_failure("9", "dimension mismatch");
        total.merge(chunk);

        assert_eq!(total.inserted, 5);
        assert_eq!(total.updated, 1);
        assert_eq!(total.failed_count(), 1);
        assert_eq!(total.written(), 6);
        assert_eq!(total.processed(), 7);
    }

    #[test]
    fn test_relevance_judgments() {
        let mut judgments: RelevanceJudgments =
            vec![("q1", "d1"), ("q1", "d2"), ("q2", "d3")].into_iter().collect();
        judgments.mark_judged("q3");

        assert_eq!(judgments.len(), 3);
        assert_eq!(judgments.relevant("q1").map(|s| s.len()), Some(2));
        assert!(judgments.is_judged("q3"));
        assert!(judgments.relevant("q3").unwrap().is_empty());
        assert!(!judgments.is_judged("q4"));
    }
}
