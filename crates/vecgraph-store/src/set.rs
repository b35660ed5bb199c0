use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::Deserialize;
use tracing::info;
use vecgraph_core::Record;

use crate::columnar;
use crate::error::{Result, StoreError};

/// The shared embedding dataset: ordered records of one dimension.
///
/// Loaded once and handed (usually behind an `Arc`) to every backend run.
/// Ids are unique and every vector has length [`EmbeddingSet::dimension`].
#[derive(Debug, Clone)]
pub struct EmbeddingSet {
    records: Vec<Record>,
    dimension: usize,
    positions: HashMap<String, usize>,
}

impl EmbeddingSet {
    /// Build a set from records, rejecting mixed dimensions, empty vectors
    /// and duplicate ids.
    pub fn from_records(records: Vec<Record>) -> Result<Self> {
        let dimension = records.first().map(Record::dimension).ok_or(StoreError::Empty)?;

        let mut positions = HashMap::with_capacity(records.len());
        for (i, record) in records.iter().enumerate() {
            if record.vector.is_empty() {
                return Err(StoreError::EmptyVector(record.id.clone()));
            }
            if record.dimension() != dimension {
                return Err(StoreError::DimensionMismatch {
                    id: record.id.clone(),
                    expected: dimension,
                    found: record.dimension(),
                });
            }
            if positions.insert(record.id.clone(), i).is_some() {
                return Err(StoreError::DuplicateId(record.id.clone()));
            }
        }

        Ok(Self {
            records,
            dimension,
            positions,
        })
    }

    /// Load from `.parquet` or `.jsonl`/`.ndjson`, chosen by extension.
    pub fn load(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        let records = match extension.as_str() {
            "parquet" => columnar::read_parquet(path)?,
            "jsonl" | "ndjson" => read_jsonl(path)?,
            _ => return Err(StoreError::UnsupportedFormat(path.display().to_string())),
        };
        let set = Self::from_records(records)?;

        info!(
            path = %path.display(),
            records = set.len(),
            dimension = set.dimension(),
            "Loaded embedding set"
        );
        Ok(set)
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Bounded batches for `upsert_batch`. A size of zero is treated as one.
    pub fn chunks(&self, size: usize) -> std::slice::Chunks<'_, Record> {
        self.records.chunks(size.max(1))
    }

    /// Number of chunks `chunks(size)` yields.
    pub fn chunk_count(&self, size: usize) -> usize {
        self.records.len().div_ceil(size.max(1))
    }

    pub fn get(&self, id: &str) -> Option<&Record> {
        self.positions.get(id).map(|&i| &self.records[i])
    }

    /// Document id of a record id, if the record is part of this set.
    pub fn doc_id_of(&self, id: &str) -> Option<&str> {
        self.get(id).map(|r| r.doc_id.as_str())
    }
}

/// Identifiers in JSON files may be strings or integers.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum JsonId {
    Text(String),
    Number(i64),
}

impl From<JsonId> for String {
    fn from(id: JsonId) -> Self {
        match id {
            JsonId::Text(s) => s,
            JsonId::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct JsonRecord {
    id: JsonId,
    #[serde(default)]
    doc_id: Option<JsonId>,
    #[serde(default)]
    text: Option<String>,
    #[serde(alias = "emb")]
    vector: Vec<f32>,
}

/// Read JSON Lines records: `{"id", "doc_id"?, "text"?, "vector" | "emb"}`.
pub fn read_jsonl(path: &Path) -> Result<Vec<Record>> {
    let reader = BufReader::new(std::fs::File::open(path)?);
    let mut records = Vec::new();

    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let raw: JsonRecord = serde_json::from_str(&line).map_err(|e| StoreError::Parse {
            line: n + 1,
            message: e.to_string(),
        })?;

        let id: String = raw.id.into();
        records.push(Record {
            doc_id: raw.doc_id.map(String::from).unwrap_or_else(|| id.clone()),
            id,
            text: raw.text.unwrap_or_default(),
            vector: raw.vector,
        });
    }
    Ok(records)
}
