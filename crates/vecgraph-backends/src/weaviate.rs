//! Weaviate adapter over the REST and GraphQL APIs.
//!
//! The class is created with `vectorizer: none` and vectors are supplied by
//! the harness. Object ids are UUIDv5 of the record id; the original id is
//! stored in the `record_id` property.

use std::collections::HashSet;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use vecgraph_core::config::WeaviateConfig;
use vecgraph_core::{DistanceMetric, RankedResult, Record, ScoredHit, UpsertReport};

use crate::adapter::{
    check_query, distance_to_similarity, fetch_limit, partition_records, BackendAdapter,
    ClientTimeouts,
};
use crate::error::{BackendError, Result};
use crate::http::{self, record_uuid};

#[derive(Debug)]
struct WeaviateHandle {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl WeaviateHandle {
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

/// Adapter for one Weaviate class.
#[derive(Debug)]
pub struct WeaviateBackend {
    config: WeaviateConfig,
    timeouts: ClientTimeouts,
    handle: Option<WeaviateHandle>,
    dimension: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct Meta {
    #[serde(default)]
    version: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClassSchema {
    #[serde(default)]
    vector_index_config: Option<VectorIndexConfig>,
}

#[derive(Debug, Deserialize)]
struct VectorIndexConfig {
    #[serde(default)]
    distance: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectList {
    #[serde(default)]
    objects: Vec<StoredObject>,
}

#[derive(Debug, Deserialize)]
struct StoredObject {
    #[serde(default)]
    vector: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct BatchObjectResult {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    result: Option<BatchResult>,
}

#[derive(Debug, Deserialize)]
struct BatchResult {
    #[serde(default)]
    errors: Option<BatchErrors>,
}

#[derive(Debug, Deserialize)]
struct BatchErrors {
    #[serde(default)]
    error: Vec<GraphQlError>,
}

/// Weaviate's name for a distance metric.
pub fn distance_name(metric: DistanceMetric) -> &'static str {
    match metric {
        DistanceMetric::Cosine => "cosine",
        DistanceMetric::Dot => "dot",
        DistanceMetric::Euclidean => "l2-squared",
    }
}

fn parse_distance(name: &str) -> Option<DistanceMetric> {
    match name {
        "cosine" => Some(DistanceMetric::Cosine),
        "dot" => Some(DistanceMetric::Dot),
        "l2-squared" => Some(DistanceMetric::Euclidean),
        _ => None,
    }
}

fn graphql_list<T: serde::Serialize>(values: &[T]) -> String {
    serde_json::to_string(values).unwrap_or_else(|_| "[]".to_string())
}

/// Hits from a `Get { Class(nearVector: ..) }` reply.
fn parse_hits(data: &Value, class: &str, metric: DistanceMetric) -> Result<Vec<ScoredHit>> {
    let objects = data
        .pointer(&format!("/Get/{}", class))
        .and_then(Value::as_array)
        .ok_or_else(|| BackendError::Protocol(format!("missing Get.{} in reply", class)))?;

    objects
        .iter()
        .map(|object| {
            let id = object
                .get("record_id")
                .and_then(Value::as_str)
                .or_else(|| object.pointer("/_additional/id").and_then(Value::as_str))
                .ok_or_else(|| BackendError::Protocol("object without id".to_string()))?;
            let distance = object
                .pointer("/_additional/distance")
                .and_then(Value::as_f64)
                .ok_or_else(|| BackendError::Protocol("object without distance".to_string()))?;
            let hit = ScoredHit::new(id, distance_to_similarity(metric, distance));
            Ok(match object.get("doc_id").and_then(Value::as_str) {
                Some(doc_id) => hit.with_doc_id(doc_id),
                None => hit,
            })
        })
        .collect()
}

impl WeaviateBackend {
    pub fn new(config: WeaviateConfig, timeouts: ClientTimeouts) -> Self {
        Self {
            config,
            timeouts,
            handle: None,
            dimension: None,
        }
    }

    fn handle(&self) -> Result<&WeaviateHandle> {
        self.handle.as_ref().ok_or(BackendError::NotConnected)
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        Ok(self.handle()?.request(method, path))
    }

    async fn send(&self, builder: RequestBuilder) -> Result<reqwest::Response> {
        builder.send().await.map_err(http::map_reqwest_error)
    }

    async fn graphql(&self, query: String) -> Result<Value> {
        let response = self
            .send(
                self.request(Method::POST, "/v1/graphql")?
                    .json(&json!({ "query": query })),
            )
            .await?;
        let reply: GraphQlResponse = http::read_json(response).await?;
        if let Some(errors) = reply.errors.filter(|e| !e.is_empty()) {
            let messages: Vec<String> = errors.into_iter().map(|e| e.message).collect();
            return Err(BackendError::Request(messages.join("; ")));
        }
        reply
            .data
            .ok_or_else(|| BackendError::Protocol("GraphQL reply without data".to_string()))
    }

    async fn existing_class(&self) -> Result<Option<ClassSchema>> {
        let path = format!("/v1/schema/{}", self.config.class_name);
        let response = self.send(self.request(Method::GET, &path)?).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        http::read_json(response).await.map(Some)
    }

    /// Dimension of stored vectors, read from any one object.
    async fn stored_dimension(&self) -> Result<Option<usize>> {
        let path = format!(
            "/v1/objects?class={}&limit=1&include=vector",
            self.config.class_name
        );
        let response = self.send(self.request(Method::GET, &path)?).await?;
        let list: ObjectList = http::read_json(response).await?;
        Ok(list
            .objects
            .first()
            .map(|o| o.vector.len())
            .filter(|&len| len > 0))
    }

    async fn existing_ids(&self, uuids: &[String]) -> Result<HashSet<String>> {
        let query = format!(
            "{{ Get {{ {class}(where: {{path: [\"id\"], operator: ContainsAny, valueText: {ids}}}, limit: {limit}) {{ _additional {{ id }} }} }} }}",
            class = self.config.class_name,
            ids = graphql_list(uuids),
            limit = uuids.len(),
        );
        let data = self.graphql(query).await?;
        let ids = data
            .pointer(&format!("/Get/{}", self.config.class_name))
            .and_then(Value::as_array)
            .map(|objects| {
                objects
                    .iter()
                    .filter_map(|o| o.pointer("/_additional/id").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(ids)
    }
}

#[async_trait]
impl BackendAdapter for WeaviateBackend {
    fn name(&self) -> &str {
        "weaviate"
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
        if !self
            .config
            .class_name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_uppercase())
        {
            return Err(BackendError::Config(format!(
                "class name '{}' must start with an upper-case letter",
                self.config.class_name
            )));
        }

        let handle = WeaviateHandle {
            client: http::build_client(self.timeouts)?,
            base_url: http::base_url(&self.config.url),
            api_key: self.config.api_key.clone(),
        };
        let response = handle
            .request(Method::GET, "/v1/meta")
            .send()
            .await
            .map_err(http::map_reqwest_error)?;
        let meta: Meta = http::read_json(response).await?;
        self.handle = Some(handle);

        info!(url = %self.config.url, version = %meta.version, "Connected to Weaviate");
        Ok(())
    }

    async fn create_index(&mut self, dimension: usize, metric: DistanceMetric) -> Result<()> {
        self.handle()?;
        let class = &self.config.class_name;

        if let Some(schema) = self.existing_class().await? {
            let distance = schema
                .vector_index_config
                .and_then(|c| c.distance)
                .unwrap_or_else(|| "cosine".to_string());
            if parse_distance(&distance) != Some(metric) {
                return Err(BackendError::SchemaConflict(format!(
                    "class '{}' uses distance {}, requested {}",
                    class,
                    distance,
                    distance_name(metric)
                )));
            }
            if let Some(stored) = self.stored_dimension().await? {
                if stored != dimension {
                    return Err(BackendError::SchemaConflict(format!(
                        "class '{}' holds vectors of dimension {}, requested {}",
                        class, stored, dimension
                    )));
                }
            }
            debug!(class = %class, "Class already exists");
        } else {
            let body = json!({
                "class": class,
                "vectorizer": "none",
                "vectorIndexConfig": { "distance": distance_name(metric) },
                "properties": [
                    { "name": "record_id", "dataType": ["text"], "tokenization": "field" },
                    { "name": "doc_id", "dataType": ["text"], "tokenization": "field" },
                    { "name": "text", "dataType": ["text"] },
                ],
            });
            let response = self
                .send(self.request(Method::POST, "/v1/schema")?.json(&body))
                .await?;
            http::check_status(response).await?;
            info!(class = %class, dimension, "Created Weaviate class");
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

        let objects: Vec<Value> = valid
            .iter()
            .zip(&uuids)
            .map(|(record, uuid)| {
                json!({
                    "class": self.config.class_name,
                    "id": uuid,
                    "properties": {
                        "record_id": record.id,
                        "doc_id": record.doc_id,
                        "text": record.text,
                    },
                    "vector": record.vector,
                })
            })
            .collect();

        let response = self
            .send(
                self.request(Method::POST, "/v1/batch/objects")?
                    .json(&json!({ "objects": objects })),
            )
            .await?;
        let results: Vec<BatchObjectResult> = http::read_json(response).await?;

        let mut rejected = std::collections::HashMap::new();
        for result in results {
            let errors = result
                .result
                .and_then(|r| r.errors)
                .map(|e| e.error)
                .unwrap_or_default();
            if let (Some(id), false) = (result.id, errors.is_empty()) {
                let reason: Vec<String> = errors.into_iter().map(|e| e.message).collect();
                rejected.insert(id, reason.join("; "));
            }
        }

        for (record, uuid) in valid.iter().zip(&uuids) {
            if let Some(reason) = rejected.remove(uuid) {
                warn!(class = %self.config.class_name, id = %record.id, %reason, "Object rejected");
                report.record_failure(record.id.clone(), reason);
            } else if existing.contains(uuid) {
                report.updated += 1;
            } else {
                report.inserted += 1;
            }
        }
        Ok(report)
    }

    async fn query_top_k(&mut self, vector: &[f32], k: usize) -> Result<RankedResult> {
        self.handle()?;
        check_query(vector, k, self.dimension)?;

        let query = format!(
            "{{ Get {{ {class}(nearVector: {{vector: {vector}}}, limit: {k}) {{ record_id doc_id _additional {{ id distance }} }} }} }}",
            class = self.config.class_name,
            vector = graphql_list(vector),
            k = fetch_limit(k),
        );
        let data = self.graphql(query).await?;
        let hits = parse_hits(&data, &self.config.class_name, self.config.metric)?;
        Ok(RankedResult::from_hits(hits, k))
    }

    async fn clear(&mut self) -> Result<()> {
        self.handle()?;
        if self.existing_class().await?.is_some() {
            let path = format!("/v1/schema/{}", self.config.class_name);
            let response = self.send(self.request(Method::DELETE, &path)?).await?;
            http::check_status(response).await?;
            info!(class = %self.config.class_name, "Deleted Weaviate class");
        }
        self.dimension = None;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.handle = None;
        Ok(())
    }
}
