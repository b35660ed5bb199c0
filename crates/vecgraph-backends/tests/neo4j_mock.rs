//! Neo4j adapter against an in-process stand-in for the HTTP transactional
//! Cypher endpoint.
//!
//! The mock recognises the statements the adapter issues and keeps nodes,
//! the vector index and the uniqueness constraint in memory. Scores follow
//! Neo4j's normalised similarity: `(1 + cos) / 2` and `1 / (1 + d²)`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};

use vecgraph_backends::{BackendAdapter, BackendError, ClientTimeouts, Neo4jBackend};
use vecgraph_core::config::Neo4jConfig;
use vecgraph_core::{DistanceMetric, Record};

// =============================================================================
// Mock server
// =============================================================================

/// `neo4j:secret`
const AUTHORIZATION: &str = "Basic bmVvNGo6c2VjcmV0";

struct VectorIndex {
    name: String,
    dimension: usize,
    function: String,
}

#[derive(Default)]
struct MockState {
    nodes: HashMap<String, (Value, Vec<f32>)>,
    index: Option<VectorIndex>,
    constraint: bool,
    /// Node count removed by each paged delete statement.
    deletes: Vec<usize>,
    /// Fail every MERGE with a constraint violation.
    reject_writes: bool,
}

type Shared = Arc<Mutex<MockState>>;

fn between<'a>(text: &'a str, start: &str, end: &str) -> &'a str {
    let from = text.find(start).unwrap() + start.len();
    let len = text[from..].find(end).unwrap();
    &text[from..from + len]
}

fn rows(rows: Vec<Value>) -> Json<Value> {
    let data: Vec<Value> = rows.into_iter().map(|row| json!({ "row": row })).collect();
    Json(json!({"results": [{"columns": [], "data": data}], "errors": []}))
}

fn failure(code: &str, message: &str) -> Json<Value> {
    Json(json!({"results": [], "errors": [{"code": code, "message": message}]}))
}

fn similarity(function: &str, a: &[f32], b: &[f32]) -> f64 {
    if function == "euclidean" {
        let squared: f32 = a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum();
        return 1.0 / (1.0 + squared as f64);
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    (1.0 + (dot / (na * nb)) as f64) / 2.0
}

async fn commit(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some(AUTHORIZATION) {
        return failure(
            "Neo.ClientError.Security.Unauthorized",
            "The client is unauthorized due to authentication failure.",
        );
    }

    let statement = body["statements"][0]["statement"].as_str().unwrap();
    let params = &body["statements"][0]["parameters"];
    let mut state = state.lock().unwrap();

    if statement == "RETURN 1" {
        rows(vec![json!([1])])
    } else if statement.starts_with("SHOW INDEXES") {
        let found = state
            .index
            .as_ref()
            .filter(|index| params["name"] == index.name.as_str())
            .map(|index| {
                json!(["VECTOR", {
                    "indexProvider": "vector-2.0",
                    "indexConfig": {
                        "vector.dimensions": index.dimension,
                        "vector.similarity_function": index.function.to_uppercase(),
                    }
                }])
            });
        rows(found.into_iter().collect())
    } else if statement.starts_with("CREATE CONSTRAINT") {
        state.constraint = true;
        rows(vec![])
    } else if statement.starts_with("CREATE VECTOR INDEX") {
        if state.index.is_none() {
            state.index = Some(VectorIndex {
                name: between(statement, "CREATE VECTOR INDEX ", " IF").to_string(),
                dimension: between(statement, "`vector.dimensions`: ", ",")
                    .trim()
                    .parse()
                    .unwrap(),
                function: between(statement, "`vector.similarity_function`: '", "'").to_string(),
            });
        }
        rows(vec![])
    } else if statement.starts_with("UNWIND $ids") {
        let found = params["ids"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .filter(|id| state.nodes.contains_key(*id))
            .map(|id| json!([id]))
            .collect();
        rows(found)
    } else if statement.starts_with("UNWIND $rows") {
        if state.reject_writes {
            return failure(
                "Neo.ClientError.Schema.ConstraintValidationFailed",
                "Node already exists with label `Doc` and property `id`",
            );
        }
        for row in params["rows"].as_array().unwrap() {
            let emb: Vec<f32> = serde_json::from_value(row["emb"].clone()).unwrap();
            state.nodes.insert(
                row["id"].as_str().unwrap().to_string(),
                (row["doc_id"].clone(), emb),
            );
        }
        rows(vec![])
    } else if statement.starts_with("CALL db.index.vector.queryNodes") {
        let Some(index) = state.index.as_ref() else {
            return failure(
                "Neo.ClientError.Procedure.ProcedureCallFailed",
                "There is no such vector schema index",
            );
        };
        let query: Vec<f32> = serde_json::from_value(params["vector"].clone()).unwrap();
        let k = params["k"].as_u64().unwrap() as usize;
        let mut scored: Vec<(f64, &String, &Value)> = state
            .nodes
            .iter()
            .map(|(id, (doc_id, emb))| (similarity(&index.function, &query, emb), id, doc_id))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        let found = scored
            .into_iter()
            .take(k)
            .map(|(score, id, doc_id)| json!([id, doc_id, score]))
            .collect();
        rows(found)
    } else if statement.starts_with("MATCH (d:") {
        let batch = params["batch"].as_u64().unwrap() as usize;
        let doomed: Vec<String> = state.nodes.keys().take(batch).cloned().collect();
        for id in &doomed {
            state.nodes.remove(id);
        }
        state.deletes.push(doomed.len());
        rows(vec![json!([doomed.len()])])
    } else if statement.starts_with("DROP INDEX") {
        state.index = None;
        rows(vec![])
    } else if statement.starts_with("DROP CONSTRAINT") {
        state.constraint = false;
        rows(vec![])
    } else {
        panic!("unexpected statement: {}", statement);
    }
}

/// Start the mock on an ephemeral port and return its config and state.
async fn start_mock(metric: DistanceMetric) -> (Neo4jConfig, Shared) {
    let state: Shared = Arc::new(Mutex::new(MockState::default()));
    let app = Router::new()
        .route("/db/{database}/tx/commit", post(commit))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let config = Neo4jConfig {
        uri: format!("http://127.0.0.1:{}", port),
        user: Some("neo4j".to_string()),
        password: Some("secret".to_string()),
        metric,
        ..Neo4jConfig::default()
    };
    (config, state)
}

async fn connected(metric: DistanceMetric) -> (Neo4jBackend, Shared) {
    let (config, state) = start_mock(metric).await;
    let mut backend = Neo4jBackend::new(config, ClientTimeouts::default());
    backend.connect().await.unwrap();
    (backend, state)
}

/// Port of a listener that accepts connections and never answers.
async fn silent_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut held = Vec::new();
        loop {
            let (socket, _) = listener.accept().await.unwrap();
            held.push(socket);
        }
    });
    port
}

fn records() -> Vec<Record> {
    vec![
        Record::new("r1", "first", vec![1.0, 0.0, 0.0]).with_doc_id("d1"),
        Record::new("r2", "second", vec![0.0, 1.0, 0.0]).with_doc_id("d2"),
        Record::new("r3", "third", vec![0.7, 0.7, 0.0]).with_doc_id("d1"),
    ]
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_index_and_query_cosine() {
    let (mut backend, state) = connected(DistanceMetric::Cosine).await;
    backend.create_index(3, DistanceMetric::Cosine).await.unwrap();
    assert!(state.lock().unwrap().constraint);

    let report = backend.upsert_batch(&records()).await.unwrap();
    assert_eq!(report.inserted, 3);
    assert_eq!(report.updated, 0);

    let result = backend.query_top_k(&[1.0, 0.1, 0.0], 2).await.unwrap();
    assert_eq!(result.ids(), vec!["r1", "r3"]);
    assert_eq!(result.hits()[0].doc_id.as_deref(), Some("d1"));
    assert!(result.hits()[0].score > result.hits()[1].score);
}

#[tokio::test]
async fn test_reupsert_counts_updates() {
    let (mut backend, _) = connected(DistanceMetric::Cosine).await;
    backend.create_index(3, DistanceMetric::Cosine).await.unwrap();
    backend.upsert_batch(&records()).await.unwrap();

    let again = vec![
        Record::new("r2", "second, edited", vec![0.0, 0.0, 1.0]),
        Record::new("r4", "fourth", vec![0.0, 0.5, 0.5]),
    ];
    let report = backend.upsert_batch(&again).await.unwrap();
    assert_eq!(report.inserted, 1);
    assert_eq!(report.updated, 1);

    let result = backend.query_top_k(&[0.0, 0.0, 1.0], 1).await.unwrap();
    assert_eq!(result.ids(), vec!["r2"]);
}

#[tokio::test]
async fn test_existing_index_read_from_show_indexes() {
    let (mut backend, _) = connected(DistanceMetric::Cosine).await;
    backend.create_index(3, DistanceMetric::Cosine).await.unwrap();
    backend.upsert_batch(&records()).await.unwrap();

    // Same schema keeps the data.
    backend.create_index(3, DistanceMetric::Cosine).await.unwrap();
    assert_eq!(backend.query_top_k(&[0.0, 1.0, 0.0], 10).await.unwrap().len(), 3);

    assert!(matches!(
        backend.create_index(4, DistanceMetric::Cosine).await,
        Err(BackendError::SchemaConflict(_))
    ));
    assert!(matches!(
        backend.create_index(3, DistanceMetric::Euclidean).await,
        Err(BackendError::SchemaConflict(_))
    ));
    assert!(matches!(
        backend.create_index(3, DistanceMetric::Dot).await,
        Err(BackendError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn test_rejected_transaction_fails_whole_batch() {
    let (mut backend, state) = connected(DistanceMetric::Cosine).await;
    backend.create_index(3, DistanceMetric::Cosine).await.unwrap();
    state.lock().unwrap().reject_writes = true;

    let report = backend.upsert_batch(&records()).await.unwrap();
    assert_eq!(report.inserted, 0);
    assert_eq!(report.failed.len(), 3);
    assert!(report.failed[0].reason.contains("ConstraintValidationFailed"));
    assert!(state.lock().unwrap().nodes.is_empty());
}

#[tokio::test]
async fn test_euclidean_similarity_ordering() {
    let (mut backend, _) = connected(DistanceMetric::Euclidean).await;
    backend.create_index(3, DistanceMetric::Euclidean).await.unwrap();
    backend.upsert_batch(&records()).await.unwrap();

    let result = backend.query_top_k(&[1.0, 0.0, 0.0], 3).await.unwrap();
    assert_eq!(result.ids()[0], "r1");
    assert!((result.hits()[0].score - 1.0).abs() < 1e-9);
    assert!(result.hits()[1].score >= result.hits()[2].score);
}

#[tokio::test]
async fn test_clear_deletes_in_pages_and_is_repeatable() {
    let (mut backend, state) = connected(DistanceMetric::Cosine).await;
    backend.create_index(2, DistanceMetric::Cosine).await.unwrap();
    let many: Vec<Record> = (0..10_005)
        .map(|i| Record::new(format!("n{}", i), "", vec![1.0, i as f32]))
        .collect();
    assert_eq!(backend.upsert_batch(&many).await.unwrap().inserted, 10_005);

    backend.clear().await.unwrap();
    {
        let state = state.lock().unwrap();
        assert_eq!(state.deletes, vec![10_000, 5, 0]);
        assert!(state.nodes.is_empty());
        assert!(state.index.is_none());
        assert!(!state.constraint);
    }

    backend.clear().await.unwrap();
    assert_eq!(state.lock().unwrap().deletes, vec![10_000, 5, 0, 0]);

    backend.create_index(3, DistanceMetric::Cosine).await.unwrap();
    assert_eq!(backend.upsert_batch(&records()).await.unwrap().inserted, 3);
}

#[tokio::test]
async fn test_ties_at_cutoff_resolved_by_id() {
    let (mut backend, _) = connected(DistanceMetric::Cosine).await;
    backend.create_index(3, DistanceMetric::Cosine).await.unwrap();
    backend.upsert_batch(&records()).await.unwrap();
    let tied = vec![
        Record::new("t3", "tied", vec![0.0, 0.0, 1.0]),
        Record::new("t1", "tied", vec![0.0, 0.0, 2.0]),
        Record::new("t2", "tied", vec![0.0, 0.0, 3.0]),
    ];
    backend.upsert_batch(&tied).await.unwrap();

    let result = backend.query_top_k(&[0.0, 0.0, 1.0], 2).await.unwrap();
    assert_eq!(result.ids(), vec!["t1", "t2"]);
}

#[tokio::test]
async fn test_wrong_password_is_config_error() {
    let (mut config, _) = start_mock(DistanceMetric::Cosine).await;
    config.password = Some("wrong".to_string());
    let mut backend = Neo4jBackend::new(config, ClientTimeouts::default());

    assert!(matches!(backend.connect().await, Err(BackendError::Config(_))));
    assert!(!backend.is_connected());
}

#[tokio::test]
async fn test_connect_cut_by_deadline_stays_disconnected() {
    let config = Neo4jConfig {
        uri: format!("http://127.0.0.1:{}", silent_port().await),
        user: Some("neo4j".to_string()),
        password: Some("secret".to_string()),
        ..Neo4jConfig::default()
    };
    let mut backend = Neo4jBackend::new(config, ClientTimeouts::default());

    for _ in 0..2 {
        let attempt = tokio::time::timeout(Duration::from_millis(200), backend.connect()).await;
        assert!(attempt.is_err());
        assert!(!backend.is_connected());
    }
    assert!(matches!(
        backend.upsert_batch(&records()).await,
        Err(BackendError::NotConnected)
    ));
}
