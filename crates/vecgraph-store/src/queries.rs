use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info};
use vecgraph_core::{Query, RelevanceJudgments};

use crate::embedding::DynEmbeddingService;
use crate::error::{Result, StoreError};
use crate::set::JsonId;

/// A query as read from disk, before it has a vector and a k.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySpec {
    pub id: String,
    pub text: String,
    pub vector: Option<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
struct JsonQuery {
    #[serde(rename = "_id", alias = "id")]
    id: JsonId,
    #[serde(default)]
    text: String,
    #[serde(default, alias = "emb")]
    vector: Option<Vec<f32>>,
}

/// Load queries from a JSON Lines file (`{"_id", "text", "vector"?}` per line).
pub fn load_queries(path: &Path) -> Result<Vec<QuerySpec>> {
    let reader = BufReader::new(std::fs::File::open(path)?);
    let mut queries = Vec::new();

    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let raw: JsonQuery = serde_json::from_str(&line).map_err(|e| StoreError::Parse {
            line: n + 1,
            message: e.to_string(),
        })?;
        queries.push(QuerySpec {
            id: raw.id.into(),
            text: raw.text,
            vector: raw.vector,
        });
    }

    info!(path = %path.display(), queries = queries.len(), "Loaded queries");
    Ok(queries)
}

/// Keep only queries that have a relevance judgment, preserving order.
pub fn filter_judged(queries: Vec<QuerySpec>, judgments: &RelevanceJudgments) -> Vec<QuerySpec> {
    let total = queries.len();
    let judged: Vec<QuerySpec> = queries
        .into_iter()
        .filter(|q| judgments.is_judged(&q.id))
        .collect();
    debug!(total, judged = judged.len(), "Filtered queries to judged set");
    judged
}

/// Turn query specs into runnable queries, embedding text where no vector
/// was supplied.
pub async fn embed_queries(
    specs: Vec<QuerySpec>,
    embedder: &dyn DynEmbeddingService,
    k: usize,
) -> Result<Vec<Query>> {
    let mut queries = Vec::with_capacity(specs.len());
    for spec in specs {
        let vector = match spec.vector {
            Some(vector) => vector,
            None => embedder.embed_boxed(&spec.text).await.map_err(|e| {
                StoreError::Embedding(format!("query '{}': {}", spec.id, e))
            })?,
        };
        queries.push(Query::new(spec.id, spec.text, vector, k.max(1)));
    }
    Ok(queries)
}
