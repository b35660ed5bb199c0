//! Weaviate adapter against an in-process stand-in for the Weaviate REST
//! and GraphQL APIs.
//!
//! The mock understands the two GraphQL shapes the adapter sends (id lookup
//! with `ContainsAny` and `nearVector` search) and answers batch writes with
//! per-object results, so class lifecycle and upsert accounting can be
//! checked without a running Weaviate.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use vecgraph_backends::{BackendAdapter, BackendError, ClientTimeouts, WeaviateBackend};
use vecgraph_core::config::WeaviateConfig;
use vecgraph_core::{DistanceMetric, Record};

// =============================================================================
// Mock server
// =============================================================================

struct Class {
    distance: String,
    objects: HashMap<String, (Vec<f32>, Value)>,
}

#[derive(Default)]
struct MockState {
    classes: HashMap<String, Class>,
    /// Record ids the batch endpoint refuses.
    refuse: HashSet<String>,
}

type Shared = Arc<Mutex<MockState>>;

type Reply = Result<Json<Value>, (StatusCode, Json<Value>)>;

fn between<'a>(text: &'a str, start: &str, end: &str) -> &'a str {
    let from = text.find(start).unwrap() + start.len();
    let len = text[from..].find(end).unwrap();
    &text[from..from + len]
}

fn distance(kind: &str, a: &[f32], b: &[f32]) -> f64 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    match kind {
        "l2-squared" => a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum::<f32>() as f64,
        "dot" => -(dot as f64),
        _ => {
            let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
            let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
            1.0 - (dot / (na * nb)) as f64
        }
    }
}

async fn meta() -> Json<Value> {
    Json(json!({"hostname": "http://[::]:8080", "version": "1.24.0", "modules": {}}))
}

async fn get_class(State(state): State<Shared>, Path(name): Path<String>) -> Reply {
    let state = state.lock().unwrap();
    let class = state
        .classes
        .get(&name)
        .ok_or((StatusCode::NOT_FOUND, Json(json!({}))))?;
    Ok(Json(json!({
        "class": name,
        "vectorizer": "none",
        "vectorIndexConfig": {"distance": class.distance},
    })))
}

async fn create_class(State(state): State<Shared>, Json(body): Json<Value>) -> Reply {
    let mut state = state.lock().unwrap();
    let name = body["class"].as_str().unwrap().to_string();
    if state.classes.contains_key(&name) {
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({"error": [{"message": format!("class name {:?} already exists", name)}]})),
        ));
    }
    let distance = body["vectorIndexConfig"]["distance"].as_str().unwrap().to_string();
    state.classes.insert(
        name,
        Class {
            distance,
            objects: HashMap::new(),
        },
    );
    Ok(Json(body))
}

async fn delete_class(State(state): State<Shared>, Path(name): Path<String>) -> StatusCode {
    state.lock().unwrap().classes.remove(&name);
    StatusCode::OK
}

async fn list_objects(
    State(state): State<Shared>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    let state = state.lock().unwrap();
    let objects: Vec<Value> = state
        .classes
        .get(&params["class"])
        .and_then(|class| class.objects.values().next())
        .map(|(vector, _)| vec![json!({ "vector": vector })])
        .unwrap_or_default();
    Json(json!({ "objects": objects }))
}

async fn batch_objects(State(state): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    let mut state = state.lock().unwrap();
    let mut results = Vec::new();
    for object in body["objects"].as_array().unwrap() {
        let id = object["id"].as_str().unwrap().to_string();
        let record_id = object["properties"]["record_id"].as_str().unwrap();
        if state.refuse.contains(record_id) {
            results.push(json!({
                "id": id,
                "result": {"errors": {"error": [{"message": "store is read-only"}]}}
            }));
            continue;
        }
        let vector: Vec<f32> = serde_json::from_value(object["vector"].clone()).unwrap();
        let class = state
            .classes
            .get_mut(object["class"].as_str().unwrap())
            .unwrap();
        class
            .objects
            .insert(id.clone(), (vector, object["properties"].clone()));
        results.push(json!({"id": id, "result": {}}));
    }
    Json(Value::Array(results))
}

async fn graphql(State(state): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    let query = body["query"].as_str().unwrap();
    let name = between(query, "Get { ", "(").trim().to_string();
    let state = state.lock().unwrap();
    let Some(class) = state.classes.get(&name) else {
        let message = format!("Cannot query field \"{}\" on type \"GetObjectsObj\".", name);
        return Json(json!({"data": {"Get": null}, "errors": [{"message": message}]}));
    };

    let objects: Vec<Value> = if query.contains("ContainsAny") {
        let wanted: Vec<String> =
            serde_json::from_str(&format!("[{}]", between(query, "valueText: [", "]"))).unwrap();
        wanted
            .into_iter()
            .filter(|id| class.objects.contains_key(id))
            .map(|id| json!({"_additional": {"id": id}}))
            .collect()
    } else {
        let vector: Vec<f32> =
            serde_json::from_str(&format!("[{}]", between(query, "vector: [", "]"))).unwrap();
        let limit: usize = between(query, "limit: ", ")").trim().parse().unwrap();
        let mut scored: Vec<(f64, &String, &Value)> = class
            .objects
            .iter()
            .map(|(id, (stored, props))| (distance(&class.distance, &vector, stored), id, props))
            .collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0));
        scored
            .into_iter()
            .take(limit)
            .map(|(distance, id, props)| {
                json!({
                    "record_id": props["record_id"],
                    "doc_id": props["doc_id"],
                    "_additional": {"id": id, "distance": distance},
                })
            })
            .collect()
    };
    Json(json!({"data": {"Get": { name: objects }}}))
}

/// Start the mock on an ephemeral port and return its config and state.
async fn start_mock(metric: DistanceMetric) -> (WeaviateConfig, Shared) {
    let state: Shared = Arc::new(Mutex::new(MockState::default()));
    let app = Router::new()
        .route("/v1/meta", get(meta))
        .route("/v1/schema", post(create_class))
        .route("/v1/schema/{name}", get(get_class).delete(delete_class))
        .route("/v1/objects", get(list_objects))
        .route("/v1/batch/objects", post(batch_objects))
        .route("/v1/graphql", post(graphql))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let config = WeaviateConfig {
        url: format!("http://127.0.0.1:{}/", port),
        class_name: "Bench".to_string(),
        metric,
        ..WeaviateConfig::default()
    };
    (config, state)
}

async fn connected(metric: DistanceMetric) -> (WeaviateBackend, Shared) {
    let (config, state) = start_mock(metric).await;
    let mut backend = WeaviateBackend::new(config, ClientTimeouts::default());
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
    let (mut backend, _) = connected(DistanceMetric::Cosine).await;
    backend.create_index(3, DistanceMetric::Cosine).await.unwrap();

    let report = backend.upsert_batch(&records()).await.unwrap();
    assert_eq!(report.inserted, 3);
    assert_eq!(report.updated, 0);

    let result = backend.query_top_k(&[1.0, 0.1, 0.0], 2).await.unwrap();
    assert_eq!(result.ids(), vec!["r1", "r3"]);
    assert_eq!(result.hits()[0].doc_id.as_deref(), Some("d1"));
    assert!(result.hits()[0].score > result.hits()[1].score);
    assert!(result.hits()[0].score <= 1.0);
}

#[tokio::test]
async fn test_reupsert_found_by_id_lookup() {
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
async fn test_refused_objects_reported_per_record() {
    let (mut backend, state) = connected(DistanceMetric::Cosine).await;
    backend.create_index(3, DistanceMetric::Cosine).await.unwrap();
    state.lock().unwrap().refuse.insert("r2".to_string());

    let report = backend.upsert_batch(&records()).await.unwrap();
    assert_eq!(report.inserted, 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].id, "r2");
    assert!(report.failed[0].reason.contains("read-only"));

    let result = backend.query_top_k(&[0.0, 1.0, 0.0], 10).await.unwrap();
    assert!(!result.ids().contains(&"r2"));
}

#[tokio::test]
async fn test_create_index_idempotent_and_conflict() {
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
}

#[tokio::test]
async fn test_l2_squared_scores_are_negated() {
    let (mut backend, _) = connected(DistanceMetric::Euclidean).await;
    backend.create_index(3, DistanceMetric::Euclidean).await.unwrap();
    backend.upsert_batch(&records()).await.unwrap();

    let result = backend.query_top_k(&[1.0, 0.0, 0.0], 3).await.unwrap();
    assert_eq!(result.ids()[0], "r1");
    assert!(result.hits()[0].score.abs() < 1e-6);
    assert!(result.hits().iter().all(|h| h.score <= 0.0));
}

#[tokio::test]
async fn test_clear_deletes_class_and_is_repeatable() {
    let (mut backend, state) = connected(DistanceMetric::Cosine).await;
    backend.create_index(3, DistanceMetric::Cosine).await.unwrap();
    backend.upsert_batch(&records()).await.unwrap();

    backend.clear().await.unwrap();
    backend.clear().await.unwrap();
    assert!(state.lock().unwrap().classes.is_empty());

    backend.create_index(2, DistanceMetric::Cosine).await.unwrap();
    let report = backend
        .upsert_batch(&[Record::new("x", "two dims", vec![1.0, 0.0])])
        .await
        .unwrap();
    assert_eq!(report.inserted, 1);
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
async fn test_connect_cut_by_deadline_stays_disconnected() {
    let config = WeaviateConfig {
        url: format!("http://127.0.0.1:{}", silent_port().await),
        ..WeaviateConfig::default()
    };
    let mut backend = WeaviateBackend::new(config, ClientTimeouts::default());

    for _ in 0..2 {
        let attempt = tokio::time::timeout(Duration::from_millis(200), backend.connect()).await;
        assert!(attempt.is_err());
        assert!(!backend.is_connected());
    }
    assert!(matches!(
        backend.query_top_k(&[1.0, 0.0], 1).await,
        Err(BackendError::NotConnected)
    ));
}
