//! In-process reference backend with brute-force similarity search.
//!
//! Exact nearest neighbours, so it doubles as the baseline the approximate
//! indexes are compared against. All operations are O(n).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::debug;
use vecgraph_core::{DistanceMetric, RankedResult, Record, ScoredHit, UpsertReport};

use crate::adapter::{check_query, partition_records, BackendAdapter};
use crate::error::{BackendError, Result};

#[derive(Debug, Clone)]
struct StoredRecord {
    doc_id: String,
    vector: Vec<f32>,
}

#[derive(Debug)]
struct Collection {
    dimension: usize,
    metric: DistanceMetric,
    entries: HashMap<String, StoredRecord>,
}

/// In-memory backend.
///
/// The collection lives behind an `Arc<RwLock<..>>`, so clones of one
/// backend see the same data. Closing the session does not drop the data.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    metric: DistanceMetric,
    store: Arc<RwLock<Option<Collection>>>,
    connected: bool,
}

impl MemoryBackend {
    pub fn new(metric: DistanceMetric) -> Self {
        Self {
            metric,
            store: Arc::new(RwLock::new(None)),
            connected: false,
        }
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.store
            .read()
            .map(|s| s.as_ref().map_or(0, |c| c.entries.len()))
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            Err(BackendError::NotConnected)
        }
    }

    fn poisoned<E: std::fmt::Display>(e: E) -> BackendError {
        BackendError::Request(format!("lock poisoned: {}", e))
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(DistanceMetric::Cosine)
    }
}

#[async_trait]
impl BackendAdapter for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn metric(&self) -> DistanceMetric {
        self.metric
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn connect(&mut self) -> Result<()> {
        self.connected = true;
        Ok(())
    }

    async fn create_index(&mut self, dimension: usize, metric: DistanceMetric) -> Result<()> {
        self.ensure_connected()?;
        if dimension == 0 {
            return Err(BackendError::InvalidInput("dimension must be positive".to_string()));
        }
        let mut store = self.store.write().map_err(Self::poisoned)?;
        if let Some(existing) = store.as_ref() {
            if existing.dimension != dimension || existing.metric != metric {
                return Err(BackendError::SchemaConflict(format!(
                    "index exists with dimension {} and metric {}, requested {} and {}",
                    existing.dimension, existing.metric, dimension, metric
                )));
            }
            return Ok(());
        }

        *store = Some(Collection {
            dimension,
            metric,
            entries: HashMap::new(),
        });
        debug!(dimension, %metric, "Created in-memory index");
        Ok(())
    }

    async fn upsert_batch(&mut self, records: &[Record]) -> Result<UpsertReport> {
        self.ensure_connected()?;
        let mut store = self.store.write().map_err(Self::poisoned)?;
        let collection = store.as_mut().ok_or_else(|| {
            BackendError::Request("index does not exist; call create_index first".to_string())
        })?;

        let (valid, mut report) = partition_records(records, Some(collection.dimension));
        for record in valid {
            let previous = collection.entries.insert(
                record.id.clone(),
                StoredRecord {
                    doc_id: record.doc_id.clone(),
                    vector: record.vector.clone(),
                },
            );
            if previous.is_some() {
                report.updated += 1;
            } else {
                report.inserted += 1;
            }
        }
        Ok(report)
    }

    async fn query_top_k(&mut self, vector: &[f32], k: usize) -> Result<RankedResult> {
        self.ensure_connected()?;
        let store = self.store.read().map_err(Self::poisoned)?;
        let Some(collection) = store.as_ref() else {
            check_query(vector, k, None)?;
            return Ok(RankedResult::empty());
        };
        check_query(vector, k, Some(collection.dimension))?;

        let hits = collection
            .entries
            .iter()
            .map(|(id, entry)| {
                ScoredHit::new(id.clone(), similarity(collection.metric, vector, &entry.vector))
                    .with_doc_id(entry.doc_id.clone())
            })
            .collect();
        Ok(RankedResult::from_hits(hits, k))
    }

    async fn clear(&mut self) -> Result<()> {
        self.ensure_connected()?;
        let mut store = self.store.write().map_err(Self::poisoned)?;
        *store = None;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.connected = false;
        Ok(())
    }
}

/// Similarity under `metric`; higher is closer.
pub fn similarity(metric: DistanceMetric, a: &[f32], b: &[f32]) -> f64 {
    match metric {
        DistanceMetric::Cosine => cosine_similarity(a, b),
        DistanceMetric::Dot => dot(a, b),
        DistanceMetric::Euclidean => -euclidean_distance(a, b),
    }
}

fn dot(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum()
}

/// Cosine similarity; 0.0 if either vector has zero magnitude.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mag_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot(a, b) / (mag_a * mag_b)
}

fn euclidean_distance(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| ((*x as f64) - (*y as f64)).powi(2))
        .sum::<f64>()
        .sqrt()
}
