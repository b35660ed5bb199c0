//! Redis Stack adapter using RediSearch vector similarity.
//!
//! Records are `HASH` keys `<prefix><id>` holding `record_id`, `doc_id`,
//! `text` and the vector as little-endian FLOAT32 bytes. The index is an
//! HNSW `VECTOR` field over that prefix.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{RedisError, Value};
use tracing::{debug, info};
use vecgraph_core::config::RedisConfig;
use vecgraph_core::{DistanceMetric, RankedResult, Record, ScoredHit, UpsertReport};

use crate::adapter::{
    check_query, fetch_limit, partition_records, BackendAdapter, ClientTimeouts,
};
use crate::error::{BackendError, Result};

/// Adapter for a RediSearch index.
pub struct RedisBackend {
    config: RedisConfig,
    timeouts: ClientTimeouts,
    connection: Option<MultiplexedConnection>,
    dimension: Option<usize>,
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("index", &self.config.index_name)
            .field("connected", &self.connection.is_some())
            .finish()
    }
}

/// RediSearch's name for a distance metric.
pub fn distance_name(metric: DistanceMetric) -> &'static str {
    match metric {
        DistanceMetric::Cosine => "COSINE",
        DistanceMetric::Dot => "IP",
        DistanceMetric::Euclidean => "L2",
    }
}

fn parse_distance(name: &str) -> Option<DistanceMetric> {
    match name.to_ascii_uppercase().as_str() {
        "COSINE" => Some(DistanceMetric::Cosine),
        "IP" => Some(DistanceMetric::Dot),
        "L2" => Some(DistanceMetric::Euclidean),
        _ => None,
    }
}

/// RediSearch returns `1 - cos` for COSINE and `1 - ip` for IP.
fn hit_score(metric: DistanceMetric, distance: f64) -> f64 {
    match metric {
        DistanceMetric::Cosine | DistanceMetric::Dot => 1.0 - distance,
        DistanceMetric::Euclidean => -distance,
    }
}

pub fn vector_bytes(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn map_redis_error(err: RedisError) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout(err.to_string())
    } else if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
        BackendError::Connection(err.to_string())
    } else {
        BackendError::Request(err.to_string())
    }
}

fn is_unknown_index(err: &RedisError) -> bool {
    let message = err.to_string().to_ascii_lowercase();
    message.contains("unknown index name") || message.contains("no such index")
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::BulkString(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        Value::SimpleString(s) => Some(s.clone()),
        Value::Int(i) => Some(i.to_string()),
        Value::Double(d) => Some(d.to_string()),
        Value::Okay => Some("OK".to_string()),
        _ => None,
    }
}

/// Flatten a nested reply into its scalar tokens, in order.
fn flatten(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Array(items) | Value::Set(items) => {
            for item in items {
                flatten(item, out);
            }
        }
        Value::Map(pairs) => {
            for (k, v) in pairs {
                flatten(k, out);
                flatten(v, out);
            }
        }
        other => {
            if let Some(text) = value_text(other) {
                out.push(text);
            }
        }
    }
}

/// Dimension and metric of the vector field described in an `FT.INFO` reply.
fn index_schema(info: &Value) -> Option<(usize, DistanceMetric)> {
    let mut tokens = Vec::new();
    flatten(info, &mut tokens);

    let after = |key: &str| {
        tokens
            .iter()
            .position(|t| t.eq_ignore_ascii_case(key))
            .and_then(|i| tokens.get(i + 1))
    };
    let dimension = after("dim")?.parse().ok()?;
    let metric = parse_distance(after("distance_metric")?)?;
    Some((dimension, metric))
}

/// Parse an `FT.SEARCH ... RETURN` reply: `[total, key, [field, value, ..], ..]`.
fn parse_search_reply(reply: &Value, prefix: &str, metric: DistanceMetric) -> Result<Vec<ScoredHit>> {
    let Value::Array(items) = reply else {
        return Err(BackendError::Protocol("FT.SEARCH reply is not an array".to_string()));
    };

    let mut hits = Vec::new();
    for pair in items.get(1..).unwrap_or_default().chunks(2) {
        let [key, fields] = pair else {
            return Err(BackendError::Protocol("truncated FT.SEARCH reply".to_string()));
        };
        let key = value_text(key)
            .ok_or_else(|| BackendError::Protocol("document key is not a string".to_string()))?;

        let mut tokens = Vec::new();
        flatten(fields, &mut tokens);
        let field = |name: &str| {
            tokens
                .chunks(2)
                .find(|kv| kv[0] == name)
                .and_then(|kv| kv.get(1))
                .cloned()
        };

        let id = field("record_id")
            .unwrap_or_else(|| key.strip_prefix(prefix).unwrap_or(&key).to_string());
        let distance: f64 = field("vector_score")
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| BackendError::Protocol(format!("no vector_score for {}", key)))?;

        let hit = ScoredHit::new(id, hit_score(metric, distance));
        hits.push(match field("doc_id") {
            Some(doc_id) => hit.with_doc_id(doc_id),
            None => hit,
        });
    }
    Ok(hits)
}

impl RedisBackend {
    pub fn new(config: RedisConfig, timeouts: ClientTimeouts) -> Self {
        Self {
            config,
            timeouts,
            connection: None,
            dimension: None,
        }
    }

    fn key(&self, id: &str) -> String {
        format!("{}{}", self.config.key_prefix, id)
    }

    fn connection(&self) -> Result<MultiplexedConnection> {
        self.connection.clone().ok_or(BackendError::NotConnected)
    }

    async fn bounded<T, F>(&self, limit: Duration, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result.map_err(map_redis_error),
            Err(_) => Err(BackendError::Timeout(format!("{} exceeded {:?}", what, limit))),
        }
    }

    async fn info(&self) -> Result<Option<Value>> {
        let mut conn = self.connection()?;
        let mut cmd = redis::cmd("FT.INFO");
        cmd.arg(&self.config.index_name);

        let reply: redis::RedisResult<Value> =
            tokio::time::timeout(self.timeouts.request, cmd.query_async(&mut conn))
                .await
                .map_err(|_| BackendError::Timeout("FT.INFO".to_string()))?;
        match reply {
            Ok(value) => Ok(Some(value)),
            Err(e) if is_unknown_index(&e) => Ok(None),
            Err(e) => Err(map_redis_error(e)),
        }
    }
}

#[async_trait]
impl BackendAdapter for RedisBackend {
    fn name(&self) -> &str {
        "redis"
    }

    fn metric(&self) -> DistanceMetric {
        self.config.metric
    }

    fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    async fn connect(&mut self) -> Result<()> {
        if self.connection.is_some() {
            return Ok(());
        }
        let client = redis::Client::open(self.config.url())
            .map_err(|e| BackendError::Config(format!("invalid Redis URL: {}", e)))?;
        let mut conn = self
            .bounded(
                self.timeouts.connect,
                "connect",
                client.get_multiplexed_async_connection(),
            )
            .await?;

        let pong: String = self
            .bounded(
                self.timeouts.request,
                "PING",
                redis::cmd("PING").query_async(&mut conn),
            )
            .await?;
        debug!(reply = %pong, "Redis PING");

        self.connection = Some(conn);
        info!(host = %self.config.host, port = self.config.port, "Connected to Redis");
        Ok(())
    }

    async fn create_index(&mut self, dimension: usize, metric: DistanceMetric) -> Result<()> {
        let mut conn = self.connection()?;
        let index = self.config.index_name.clone();

        if let Some(info) = self.info().await? {
            match index_schema(&info) {
                Some((dim, existing)) if dim != dimension || existing != metric => {
                    return Err(BackendError::SchemaConflict(format!(
                        "index '{}' has DIM {} and DISTANCE_METRIC {}, requested {} and {}",
                        index,
                        dim,
                        distance_name(existing),
                        dimension,
                        distance_name(metric)
                    )));
                }
                Some(_) => debug!(index = %index, "Index already exists"),
                None => {
                    return Err(BackendError::SchemaConflict(format!(
                        "index '{}' exists without a recognisable vector field",
                        index
                    )))
                }
            }
        } else {
            let mut cmd = redis::cmd("FT.CREATE");
            cmd.arg(&index)
                .arg("ON")
                .arg("HASH")
                .arg("PREFIX")
                .arg(1)
                .arg(&self.config.key_prefix)
                .arg("SCHEMA")
                .arg("record_id")
                .arg("TAG")
                .arg("doc_id")
                .arg("TAG")
                .arg("text")
                .arg("TEXT")
                .arg("vector")
                .arg("VECTOR")
                .arg("HNSW")
                .arg(6)
                .arg("TYPE")
                .arg("FLOAT32")
                .arg("DIM")
                .arg(dimension)
                .arg("DISTANCE_METRIC")
                .arg(distance_name(metric));
            let _: () = self
                .bounded(self.timeouts.request, "FT.CREATE", cmd.query_async(&mut conn))
                .await?;
            info!(index = %index, dimension, "Created RediSearch index");
        }

        self.dimension = Some(dimension);
        Ok(())
    }

    async fn upsert_batch(&mut self, records: &[Record]) -> Result<UpsertReport> {
        let mut conn = self.connection()?;
        let (valid, mut report) = partition_records(records, self.dimension);
        if valid.is_empty() {
            return Ok(report);
        }

        let mut exists = redis::pipe();
        for record in &valid {
            exists.exists(self.key(&record.id));
        }
        let flags: Vec<bool> = self
            .bounded(self.timeouts.request, "EXISTS", exists.query_async(&mut conn))
            .await?;

        let mut writes = redis::pipe();
        for record in &valid {
            writes
                .cmd("HSET")
                .arg(self.key(&record.id))
                .arg("record_id")
                .arg(&record.id)
                .arg("doc_id")
                .arg(&record.doc_id)
                .arg("text")
                .arg(&record.text)
                .arg("vector")
                .arg(vector_bytes(&record.vector))
                .ignore();
        }
        let _: () = self
            .bounded(self.timeouts.request, "HSET", writes.query_async(&mut conn))
            .await?;

        for existed in flags {
            if existed {
                report.updated += 1;
            } else {
                report.inserted += 1;
            }
        }
        Ok(report)
    }

    async fn query_top_k(&mut self, vector: &[f32], k: usize) -> Result<RankedResult> {
        let mut conn = self.connection()?;
        check_query(vector, k, self.dimension)?;

        let fetch = fetch_limit(k);
        let mut cmd = redis::cmd("FT.SEARCH");
        cmd.arg(&self.config.index_name)
            .arg(format!("*=>[KNN {} @vector $vec AS vector_score]", fetch))
            .arg("PARAMS")
            .arg(2)
            .arg("vec")
            .arg(vector_bytes(vector))
            .arg("SORTBY")
            .arg("vector_score")
            .arg("ASC")
            .arg("RETURN")
            .arg(3)
            .arg("record_id")
            .arg("doc_id")
            .arg("vector_score")
            .arg("LIMIT")
            .arg(0)
            .arg(fetch)
            .arg("DIALECT")
            .arg(2);
        let reply: Value = self
            .bounded(self.timeouts.request, "FT.SEARCH", cmd.query_async(&mut conn))
            .await?;

        let hits = parse_search_reply(&reply, &self.config.key_prefix, self.config.metric)?;
        Ok(RankedResult::from_hits(hits, k))
    }

    async fn clear(&mut self) -> Result<()> {
        let mut conn = self.connection()?;
        let mut cmd = redis::cmd("FT.DROPINDEX");
        cmd.arg(&self.config.index_name).arg("DD");

        let reply: redis::RedisResult<()> =
            tokio::time::timeout(self.timeouts.request, cmd.query_async(&mut conn))
                .await
                .map_err(|_| BackendError::Timeout("FT.DROPINDEX".to_string()))?;

        match reply {
            Ok(()) => info!(index = %self.config.index_name, "Dropped RediSearch index"),
            Err(e) if is_unknown_index(&e) => {
                debug!(index = %self.config.index_name, "Index already absent")
            }
            Err(e) => return Err(map_redis_error(e)),
        }
        self.dimension = None;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.connection = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(s: &str) -> Value {
        Value::BulkString(s.as_bytes().to_vec())
    }

    #[test]
    fn test_vector_bytes_little_endian() {
        let bytes = vector_bytes(&[1.0, -2.5]);
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[..4], &1.0f32.to_le_bytes());
        assert_eq!(&bytes[4..], &(-2.5f32).to_le_bytes());
    }

    #[test]
    fn test_index_schema_from_info() {
        let info = Value::Array(vec![
            bulk("index_name"),
            bulk("vectors"),
            bulk("attributes"),
            Value::Array(vec![Value::Array(vec![
                bulk("identifier"),
                bulk("vector"),
                bulk("type"),
                bulk("VECTOR"),
                bulk("algorithm"),
                bulk("HNSW"),
                bulk("data_type"),
                bulk("FLOAT32"),
                bulk("dim"),
                Value::Int(384),
                bulk("distance_metric"),
                bulk("COSINE"),
            ])]),
        ]);
        assert_eq!(index_schema(&info), Some((384, DistanceMetric::Cosine)));
        assert_eq!(index_schema(&Value::Array(vec![])), None);
    }

    #[test]
    fn test_parse_search_reply() {
        let reply = Value::Array(vec![
            Value::Int(2),
            bulk("vector:a"),
            Value::Array(vec![
                bulk("record_id"),
                bulk("a"),
                bulk("doc_id"),
                bulk("d1"),
                bulk("vector_score"),
                bulk("0.25"),
            ]),
            bulk("vector:b"),
            Value::Array(vec![bulk("vector_score"), bulk("0.5")]),
        ]);
        let hits = parse_search_reply(&reply, "vector:", DistanceMetric::Cosine).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "a");
        assert_eq!(hits[0].doc_id.as_deref(), Some("d1"));
        assert_eq!(hits[0].score, 0.75);
        assert_eq!(hits[1].id, "b");
        assert_eq!(hits[1].score, 0.5);
    }

    #[test]
    fn test_parse_search_reply_empty() {
        let reply = Value::Array(vec![Value::Int(0)]);
        assert!(parse_search_reply(&reply, "vector:", DistanceMetric::Cosine)
            .unwrap()
            .is_empty());
        assert!(parse_search_reply(&Value::Nil, "vector:", DistanceMetric::Cosine).is_err());
    }

    #[test]
    fn test_hit_score() {
        assert_eq!(hit_score(DistanceMetric::Dot, 0.25), 0.75);
        assert_eq!(hit_score(DistanceMetric::Euclidean, 2.0), -2.0);
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        let config = RedisConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            ..Default::default()
        };
        let timeouts = ClientTimeouts {
            connect: Duration::from_secs(2),
            request: Duration::from_secs(2),
        };
        let mut backend = RedisBackend::new(config, timeouts);
        let err = backend.connect().await.unwrap_err();
        assert!(err.is_retryable(), "unexpected error: {err}");
        assert!(!backend.is_connected());
    }
}
