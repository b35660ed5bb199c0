//! Qdrant adapter over the REST API.
//!
//! Qdrant point ids must be unsigned integers or UUIDs, so each record id is
//! mapped to a UUIDv5 and the original id travels in the payload as
//! `record_id`.

use std::collections::HashSet;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use vecgraph_core::config::QdrantConfig;
use vecgraph_core::{DistanceMetric, RankedResult, Record, ScoredHit, UpsertReport};

use crate::adapter::{
    check_query, fetch_limit, partition_records, BackendAdapter, ClientTimeouts,
};
use crate::error::{BackendError, Result};
use crate::http::{self, record_uuid};

#[derive(Debug)]
struct QdrantHandle {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl QdrantHandle {
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match &self.api_key {
            Some(key) => builder.header("api-key", key),
            None => builder,
        }
    }
}

/// Adapter for a Qdrant collection.
#[derive(Debug)]
pub struct QdrantBackend {
    config: QdrantConfig,
    timeouts: ClientTimeouts,
    handle: Option<QdrantHandle>,
    dimension: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct CollectionInfo {
    config: CollectionConfig,
}

#[derive(Debug, Deserialize)]
struct CollectionConfig {
    params: CollectionParams,
}

#[derive(Debug, Deserialize)]
struct CollectionParams {
    vectors: Value,
}

#[derive(Debug, Deserialize)]
struct VectorParams {
    size: usize,
    distance: String,
}

#[derive(Debug, Deserialize)]
struct RetrievedPoint {
    id: Value,
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    id: Value,
    score: f64,
    #[serde(default)]
    payload: Option<PointPayload>,
}

#[derive(Debug, Default, Deserialize)]
struct PointPayload {
    #[serde(default)]
    record_id: Option<String>,
    #[serde(default)]
    doc_id: Option<String>,
}

/// Qdrant's name for a distance metric.
pub fn distance_name(metric: DistanceMetric) -> &'static str {
    match metric {
        DistanceMetric::Cosine => "Cosine",
        DistanceMetric::Dot => "Dot",
        DistanceMetric::Euclidean => "Euclid",
    }
}

fn parse_distance(name: &str) -> Option<DistanceMetric> {
    match name {
        "Cosine" => Some(DistanceMetric::Cosine),
        "Dot" => Some(DistanceMetric::Dot),
        "Euclid" => Some(DistanceMetric::Euclidean),
        _ => None,
    }
}

/// Qdrant reports similarity for Cosine and Dot but distance for Euclid.
fn hit_score(metric: DistanceMetric, score: f64) -> f64 {
    match metric {
        DistanceMetric::Euclidean => -score,
        DistanceMetric::Cosine | DistanceMetric::Dot => score,
    }
}

fn id_string(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl QdrantBackend {
    pub fn new(config: QdrantConfig, timeouts: ClientTimeouts) -> Self {
        Self {
            config,
            timeouts,
            handle: None,
            dimension: None,
        }
    }

    fn handle(&self) -> Result<&QdrantHandle> {
        self.handle.as_ref().ok_or(BackendError::NotConnected)
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        Ok(self.handle()?.request(method, path))
    }

    fn collection_path(&self, suffix: &str) -> String {
        format!("/collections/{}{}", self.config.collection, suffix)
    }

    /// Vector size and distance of the existing collection, if any.
    async fn existing_collection(&self) -> Result<Option<(usize, DistanceMetric)>> {
        let response = self
            .request(Method::GET, &self.collection_path(""))?
            .send()
            .await
            .map_err(http::map_reqwest_error)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let info: Envelope<CollectionInfo> = http::read_json(response).await?;
        let params: VectorParams = serde_json::from_value(info.result.config.params.vectors)
            .map_err(|_| {
                BackendError::SchemaConflict(format!(
                    "collection '{}' uses named vectors",
                    self.config.collection
                ))
            })?;
        let metric = parse_distance(&params.distance).ok_or_else(|| {
            BackendError::Protocol(format!("unknown distance '{}'", params.distance))
        })?;
        Ok(Some((params.size, metric)))
    }

    async fn existing_ids(&self, uuids: &[String]) -> Result<HashSet<String>> {
        let response = self
            .request(Method::POST, &self.collection_path("/points"))?
            .json(&json!({
                "ids": uuids,
                "with_payload": false,
                "with_vector": false,
            }))
            .send()
            .await
            .map_err(http::map_reqwest_error)?;
        let points: Envelope<Vec<RetrievedPoint>> = http::read_json(response).await?;
        Ok(points.result.iter().map(|p| id_string(&p.id)).collect())
    }
}

#[async_trait]
impl BackendAdapter for QdrantBackend {
    fn name(&self) -> &str {
        "qdrant"
    }

    fn metric(&self) -> DistanceMetric {
        self.config.metric
    }

    fn is_connected(&self) -> bool {
        self.handle.is_some()
    }

    async fn connect(&mut self) -> Result<()> {
        if self.handle.is_some() {
            return Ok(());
        }
        // Stored only after the server answers; a call dropped at a deadline
        // leaves the adapter disconnected.
        let handle = QdrantHandle {
            client: http::build_client(self.timeouts)?,
            base_url: self.config.url(),
            api_key: self.config.api_key.clone(),
        };
        let response = handle
            .request(Method::GET, "/collections")
            .send()
            .await
            .map_err(http::map_reqwest_error)?;
        http::check_status(response).await?;
        self.handle = Some(handle);

        info!(url = %self.config.url(), collection = %self.config.collection, "Connected to Qdrant");
        Ok(())
    }

    async fn create_index(&mut self, dimension: usize, metric: DistanceMetric) -> Result<()> {
        self.handle()?;
        match self.existing_collection().await? {
            Some((size, existing)) if size != dimension || existing != metric => {
                return Err(BackendError::SchemaConflict(format!(
                    "collection '{}' has size {} and distance {}, requested {} and {}",
                    self.config.collection,
                    size,
                    distance_name(existing),
                    dimension,
                    distance_name(metric)
                )));
            }
            Some(_) => {
                debug!(collection = %self.config.collection, "Collection already exists");
            }
            None => {
                let response = self
                    .request(Method::PUT, &self.collection_path(""))?
                    .json(&json!({
                        "vectors": { "size": dimension, "distance": distance_name(metric) }
                    }))
                    .send()
                    .await
                    .map_err(http::map_reqwest_error)?;
                http::check_status(response).await?;
                info!(collection = %self.config.collection, dimension, "Created Qdrant collection");
            }
        }
        self.dimension = Some(dimension);
        Ok(())
    }

    async fn upsert_batch(&mut self, records: &[Record]) -> Result<UpsertReport> {
        self.handle()?;
        let (valid, mut report) = partition_records(records, self.dimension);
        if valid.is_empty() {
            return Ok(report);
        }

        let uuids: Vec<String> = valid.iter().map(|r| record_uuid(&r.id).to_string()).collect();
        let existing = self.existing_ids(&uuids).await?;

        let points: Vec<Value> = valid
            .iter()
            .zip(&uuids)
            .map(|(record, uuid)| {
                json!({
                    "id": uuid,
                    "vector": record.vector,
                    "payload": {
                        "record_id": record.id,
                        "doc_id": record.doc_id,
                        "text": record.text,
                    }
                })
            })
            .collect();

        let response = self
            .request(Method::PUT, &self.collection_path("/points?wait=true"))?
            .json(&json!({ "points": points }))
            .send()
            .await
            .map_err(http::map_reqwest_error)?;

        match http::check_status(response).await {
            Ok(_) => {
                for uuid in &uuids {
                    if existing.contains(uuid) {
                        report.updated += 1;
                    } else {
                        report.inserted += 1;
                    }
                }
            }
            // Qdrant applies a batch atomically; a rejected batch fails every record in it.
            Err(BackendError::Request(reason)) => {
                warn!(collection = %self.config.collection, %reason, "Qdrant rejected batch");
                for record in valid {
                    report.record_failure(record.id.clone(), reason.clone());
                }
            }
            Err(e) => return Err(e),
        }
        Ok(report)
    }

    async fn query_top_k(&mut self, vector: &[f32], k: usize) -> Result<RankedResult> {
        self.handle()?;
        check_query(vector, k, self.dimension)?;

        let response = self
            .request(Method::POST, &self.collection_path("/points/search"))?
            .json(&json!({
                "vector": vector,
                "limit": fetch_limit(k),
                "with_payload": ["record_id", "doc_id"],
            }))
            .send()
            .await
            .map_err(http::map_reqwest_error)?;
        let points: Envelope<Vec<ScoredPoint>> = http::read_json(response).await?;

        let metric = self.config.metric;
        let hits = points
            .result
            .into_iter()
            .map(|point| {
                let payload = point.payload.unwrap_or_default();
                let id = payload.record_id.unwrap_or_else(|| id_string(&point.id));
                let hit = ScoredHit::new(id, hit_score(metric, point.score));
                match payload.doc_id {
                    Some(doc_id) => hit.with_doc_id(doc_id),
                    None => hit,
                }
            })
            .collect();
        Ok(RankedResult::from_hits(hits, k))
    }

    async fn clear(&mut self) -> Result<()> {
        self.handle()?;
        let response = self
            .request(Method::DELETE, &self.collection_path(""))?
            .send()
            .await
            .map_err(http::map_reqwest_error)?;
        if response.status() != StatusCode::NOT_FOUND {
            http::check_status(response).await?;
        }
        self.dimension = None;
        info!(collection = %self.config.collection, "Dropped Qdrant collection");
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.handle = None;
        Ok(())
    }
}
