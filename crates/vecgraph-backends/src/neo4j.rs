//! Neo4j adapter using a native vector index, driven through the HTTP
//! transactional Cypher endpoint (`/db/{database}/tx/commit`).
//!
//! Records are `(:Doc {id, doc_id, text, emb})` nodes. Neo4j vector indexes
//! support cosine and euclidean similarity only.

use std::collections::HashSet;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};
use vecgraph_core::config::{is_identifier, Neo4jConfig};
use vecgraph_core::{DistanceMetric, RankedResult, Record, ScoredHit, UpsertReport};

use crate::adapter::{
    check_query, fetch_limit, partition_records, BackendAdapter, ClientTimeouts,
};
use crate::error::{BackendError, Result};
use crate::http;

/// Nodes deleted per statement while clearing.
const DELETE_BATCH: usize = 10_000;

#[derive(Debug)]
struct Neo4jHandle {
    client: Client,
    endpoint: String,
    user: Option<String>,
    password: Option<String>,
}

impl Neo4jHandle {
    /// Run one Cypher statement in its own transaction.
    async fn run(&self, statement: &str, parameters: Value) -> Result<Vec<Vec<Value>>> {
        let mut request = self.client.post(&self.endpoint).json(&json!({
            "statements": [{ "statement": statement, "parameters": parameters }]
        }));
        if let Some(user) = &self.user {
            request = request.basic_auth(user, self.password.as_deref());
        }

        let response = request.send().await.map_err(http::map_reqwest_error)?;
        into_rows(http::read_json(response).await?)
    }
}

/// Adapter for a Neo4j vector index.
#[derive(Debug)]
pub struct Neo4jBackend {
    config: Neo4jConfig,
    timeouts: ClientTimeouts,
    handle: Option<Neo4jHandle>,
    dimension: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct TxResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    #[serde(default)]
    errors: Vec<TxError>,
}

#[derive(Debug, Deserialize)]
struct StatementResult {
    #[serde(default)]
    data: Vec<ResultRow>,
}

#[derive(Debug, Deserialize)]
struct ResultRow {
    row: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct TxError {
    code: String,
    message: String,
}

/// Neo4j's name for a similarity function.
pub fn similarity_function(metric: DistanceMetric) -> Result<&'static str> {
    match metric {
        DistanceMetric::Cosine => Ok("cosine"),
        DistanceMetric::Euclidean => Ok("euclidean"),
        DistanceMetric::Dot => Err(BackendError::InvalidInput(
            "Neo4j vector indexes do not support dot product".to_string(),
        )),
    }
}

fn classify(error: TxError) -> BackendError {
    let message = format!("{}: {}", error.code, error.message);
    if error.code.starts_with("Neo.ClientError.Security") {
        BackendError::Config(message)
    } else if error.code.starts_with("Neo.TransientError") {
        BackendError::Connection(message)
    } else {
        BackendError::Request(message)
    }
}

/// Rows of the first statement, or the first error.
fn into_rows(response: TxResponse) -> Result<Vec<Vec<Value>>> {
    if let Some(error) = response.errors.into_iter().next() {
        return Err(classify(error));
    }
    Ok(response
        .results
        .into_iter()
        .next()
        .map(|r| r.data.into_iter().map(|d| d.row).collect())
        .unwrap_or_default())
}

/// Dimension and metric from a `SHOW INDEXES` options map.
fn index_options(options: &Value) -> Option<(usize, DistanceMetric)> {
    let config = options.get("indexConfig")?;
    let dimension = config.get("vector.dimensions")?.as_u64()? as usize;
    let metric = match config
        .get("vector.similarity_function")?
        .as_str()?
        .to_ascii_lowercase()
        .as_str()
    {
        "cosine" => DistanceMetric::Cosine,
        "euclidean" => DistanceMetric::Euclidean,
        _ => return None,
    };
    Some((dimension, metric))
}

fn parse_hits(rows: Vec<Vec<Value>>) -> Result<Vec<ScoredHit>> {
    rows.into_iter()
        .map(|row| {
            let id = match row.first() {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                _ => return Err(BackendError::Protocol("node without id".to_string())),
            };
            let score = row
                .get(2)
                .and_then(Value::as_f64)
                .ok_or_else(|| BackendError::Protocol("row without score".to_string()))?;
            let hit = ScoredHit::new(id, score);
            Ok(match row.get(1).and_then(Value::as_str) {
                Some(doc_id) => hit.with_doc_id(doc_id),
                None => hit,
            })
        })
        .collect()
}

impl Neo4jBackend {
    pub fn new(config: Neo4jConfig, timeouts: ClientTimeouts) -> Self {
        Self {
            config,
            timeouts,
            handle: None,
            dimension: None,
        }
    }

    fn constraint_name(&self) -> String {
        format!("{}_id_unique", self.config.label.to_ascii_lowercase())
    }

    async fn run(&self, statement: &str, parameters: Value) -> Result<Vec<Vec<Value>>> {
        let handle = self.handle.as_ref().ok_or(BackendError::NotConnected)?;
        handle.run(statement, parameters).await
    }

    async fn existing_index(&self) -> Result<Option<(String, Value)>> {
        let rows = self
            .run(
                "SHOW INDEXES YIELD name, type, options WHERE name = $name RETURN type, options",
                json!({ "name": self.config.index_name }),
            )
            .await?;
        Ok(rows.into_iter().next().map(|mut row| {
            let options = row.pop().unwrap_or(Value::Null);
            let kind = row
                .pop()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            (kind, options)
        }))
    }
}

#[async_trait]
impl BackendAdapter for Neo4jBackend {
    fn name(&self) -> &str {
        "neo4j"
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
        if self.config.user.is_none() || self.config.password.is_none() {
            return Err(BackendError::Config(
                "missing NEO4J_USER or NEO4J_PASSWORD".to_string(),
            ));
        }
        if !is_identifier(&self.config.label) || !is_identifier(&self.config.index_name) {
            return Err(BackendError::Config(format!(
                "label '{}' and index '{}' must be plain identifiers",
                self.config.label, self.config.index_name
            )));
        }

        let handle = Neo4jHandle {
            client: http::build_client(self.timeouts)?,
            endpoint: format!(
                "{}/db/{}/tx/commit",
                http::base_url(&self.config.uri),
                self.config.database
            ),
            user: self.config.user.clone(),
            password: self.config.password.clone(),
        };
        handle.run("RETURN 1", json!({})).await?;
        self.handle = Some(handle);

        info!(uri = %self.config.uri, database = %self.config.database, "Connected to Neo4j");
        Ok(())
    }

    async fn create_index(&mut self, dimension: usize, metric: DistanceMetric) -> Result<()> {
        let function = similarity_function(metric)?;
        let label = &self.config.label;
        let index = &self.config.index_name;

        match self.existing_index().await? {
            Some((kind, options)) => {
                if !kind.eq_ignore_ascii_case("VECTOR") {
                    return Err(BackendError::SchemaConflict(format!(
                        "index '{}' exists with type {}",
                        index, kind
                    )));
                }
                match index_options(&options) {
                    Some((dim, existing)) if dim == dimension && existing == metric => {
                        debug!(index = %index, "Vector index already exists");
                    }
                    other => {
                        return Err(BackendError::SchemaConflict(format!(
                            "index '{}' is configured as {:?}, requested dimension {} with {}",
                            index, other, dimension, function
                        )));
                    }
                }
            }
            None => {
                let constraint = format!(
                    "CREATE CONSTRAINT {name} IF NOT EXISTS FOR (d:{label}) REQUIRE d.id IS UNIQUE",
                    name = self.constraint_name(),
                    label = label,
                );
                self.run(&constraint, json!({})).await?;

                let create = format!(
                    "CREATE VECTOR INDEX {index} IF NOT EXISTS FOR (d:{label}) ON (d.emb) \
                     OPTIONS {{indexConfig: {{`vector.dimensions`: {dimension}, \
                     `vector.similarity_function`: '{function}'}}}}",
                    index = index,
                    label = label,
                    dimension = dimension,
                    function = function,
                );
                self.run(&create, json!({})).await?;
                info!(index = %index, dimension, "Created Neo4j vector index");
            }
        }

        self.dimension = Some(dimension);
        Ok(())
    }

    async fn upsert_batch(&mut self, records: &[Record]) -> Result<UpsertReport> {
        if self.handle.is_none() {
            return Err(BackendError::NotConnected);
        }
        let (valid, mut report) = partition_records(records, self.dimension);
        if valid.is_empty() {
            return Ok(report);
        }

        let ids: Vec<&str> = valid.iter().map(|r| r.id.as_str()).collect();
        let lookup = format!(
            "UNWIND $ids AS id MATCH (d:{label} {{id: id}}) RETURN d.id",
            label = self.config.label
        );
        let existing: HashSet<String> = self
            .run(&lookup, json!({ "ids": ids }))
            .await?
            .into_iter()
            .filter_map(|row| row.into_iter().next())
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();

        let rows: Vec<Value> = valid
            .iter()
            .map(|record| {
                let mut row = Map::new();
                row.insert("id".into(), json!(record.id));
                row.insert("doc_id".into(), json!(record.doc_id));
                row.insert("text".into(), json!(record.text));
                row.insert("emb".into(), json!(record.vector));
                Value::Object(row)
            })
            .collect();
        let merge = format!(
            "UNWIND $rows AS row MERGE (d:{label} {{id: row.id}}) \
             SET d.doc_id = row.doc_id, d.text = row.text, d.emb = row.emb",
            label = self.config.label
        );

        match self.run(&merge, json!({ "rows": rows })).await {
            Ok(_) => {
                for record in &valid {
                    if existing.contains(&record.id) {
                        report.updated += 1;
                    } else {
                        report.inserted += 1;
                    }
                }
            }
            // The whole statement runs in one transaction and is rolled back.
            Err(BackendError::Request(reason)) => {
                warn!(%reason, "Neo4j rejected batch");
                for record in valid {
                    report.record_failure(record.id.clone(), reason.clone());
                }
            }
            Err(e) => return Err(e),
        }
        Ok(report)
    }

    async fn query_top_k(&mut self, vector: &[f32], k: usize) -> Result<RankedResult> {
        if self.handle.is_none() {
            return Err(BackendError::NotConnected);
        }
        check_query(vector, k, self.dimension)?;

        let rows = self
            .run(
                "CALL db.index.vector.queryNodes($index, $k, $vector) YIELD node, score \
                 RETURN node.id, node.doc_id, score",
                json!({
                    "index": self.config.index_name,
                    "k": fetch_limit(k),
                    "vector": vector,
                }),
            )
            .await?;
        Ok(RankedResult::from_hits(parse_hits(rows)?, k))
    }

    async fn clear(&mut self) -> Result<()> {
        if self.handle.is_none() {
            return Err(BackendError::NotConnected);
        }
        let delete = format!(
            "MATCH (d:{label}) WITH d LIMIT $batch DETACH DELETE d RETURN count(*)",
            label = self.config.label
        );
        loop {
            let rows = self.run(&delete, json!({ "batch": DELETE_BATCH })).await?;
            let deleted = rows
                .first()
                .and_then(|row| row.first())
                .and_then(Value::as_u64)
                .unwrap_or(0);
            if deleted == 0 {
                break;
            }
            debug!(deleted, "Deleted Neo4j nodes");
        }

        self.run(
            &format!("DROP INDEX {} IF EXISTS", self.config.index_name),
            json!({}),
        )
        .await?;
        self.run(
            &format!("DROP CONSTRAINT {} IF EXISTS", self.constraint_name()),
            json!({}),
        )
        .await?;

        self.dimension = None;
        info!(index = %self.config.index_name, "Cleared Neo4j vector index");
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.handle = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_similarity_function() {
        assert_eq!(similarity_function(DistanceMetric::Cosine).unwrap(), "cosine");
        assert_eq!(similarity_function(DistanceMetric::Euclidean).unwrap(), "euclidean");
        assert!(matches!(
            similarity_function(DistanceMetric::Dot),
            Err(BackendError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_into_rows_and_errors() {
        let ok: TxResponse = serde_json::from_value(json!({
            "results": [{"columns": ["node.id", "node.doc_id", "score"],
                         "data": [{"row": ["a", "d1", 0.9], "meta": [null, null, null]}]}],
            "errors": []
        }))
        .unwrap();
        let rows = into_rows(ok).unwrap();
        let hits = parse_hits(rows).unwrap();
        assert_eq!(hits[0].id, "a");
        assert_eq!(hits[0].doc_id.as_deref(), Some("d1"));
        assert_eq!(hits[0].score, 0.9);

        let auth: TxResponse = serde_json::from_value(json!({
            "results": [],
            "errors": [{"code": "Neo.ClientError.Security.Unauthorized", "message": "bad credentials"}]
        }))
        .unwrap();
        assert!(matches!(into_rows(auth), Err(BackendError::Config(_))));

        let transient: TxResponse = serde_json::from_value(json!({
            "errors": [{"code": "Neo.TransientError.General.DatabaseUnavailable", "message": "starting"}]
        }))
        .unwrap();
        assert!(into_rows(transient).unwrap_err().is_retryable());
    }

    #[test]
    fn test_index_options() {
        let options = json!({
            "indexProvider": "vector-2.0",
            "indexConfig": {"vector.dimensions": 384, "vector.similarity_function": "COSINE"}
        });
        assert_eq!(index_options(&options), Some((384, DistanceMetric::Cosine)));
        assert_eq!(index_options(&json!({})), None);
    }

    #[tokio::test]
    async fn test_connect_requires_credentials() {
        let mut backend = Neo4jBackend::new(Neo4jConfig::default(), ClientTimeouts::default());
        assert!(matches!(backend.connect().await, Err(BackendError::Config(_))));
    }

    #[tokio::test]
    async fn test_dot_metric_rejected_before_any_request() {
        let mut backend = Neo4jBackend::new(Neo4jConfig::default(), ClientTimeouts::default());
        assert!(matches!(
            backend.create_index(3, DistanceMetric::Dot).await,
            Err(BackendError::InvalidInput(_))
        ));
    }
}
