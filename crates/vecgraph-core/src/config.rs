use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::error::Result;
use crate::types::DistanceMetric;

/// Names of every backend the harness knows how to build.
pub const BACKEND_NAMES: [&str; 6] = ["memory", "qdrant", "weaviate", "redis", "pgvector", "neo4j"];

/// Configuration problems detected at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required parameters for backend '{backend}': {}", names.join(", "))]
    MissingParameters {
        backend: String,
        names: Vec<String>,
    },

    #[error("invalid value for {key}: '{value}' ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("unknown backend '{0}'")]
    UnknownBackend(String),

    #[error("failed to parse configuration: {0}")]
    Parse(String),
}

/// Top-level configuration for vecgraph.
///
/// Loaded from `~/.vecgraph/config.toml` by default, then overlaid with the
/// per-backend environment variables (`QDRANT_HOST`, `POSTGRES_PASSWORD`, ...).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VecgraphConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub benchmark: BenchmarkConfig,
    #[serde(default)]
    pub backends: BackendsConfig,
}

impl VecgraphConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: VecgraphConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Overlay values from the process environment.
    pub fn apply_process_env(&mut self) -> std::result::Result<(), ConfigError> {
        self.apply_env(|key| std::env::var(key).ok())
    }

    /// Overlay values from an environment lookup function.
    ///
    /// Variable names follow the docker-compose setup the benchmark runs
    /// against. Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> std::result::Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("VECGRAPH_LOG_LEVEL") {
            self.general.log_level = v;
        }
        if let Some(v) = get("VECGRAPH_RESULTS_DIR") {
            self.general.results_dir = v;
        }
        if let Some(v) = get("VECGRAPH_DATABASE") {
            self.general.database_path = v;
        }
        if let Some(v) = get("VECGRAPH_PORT") {
            self.general.port = parse_port("VECGRAPH_PORT", &v)?;
        }

        let qdrant = &mut self.backends.qdrant;
        if let Some(v) = get("QDRANT_HOST") {
            qdrant.host = v;
        }
        if let Some(v) = get("QDRANT_PORT") {
            qdrant.port = parse_port("QDRANT_PORT", &v)?;
        }
        if let Some(v) = get("QDRANT_API_KEY") {
            qdrant.api_key = Some(v);
        }
        if let Some(v) = get("QDRANT_COLLECTION") {
            qdrant.collection = v;
        }

        let weaviate = &mut self.backends.weaviate;
        if let Some(v) = get("WEAVIATE_URL") {
            weaviate.url = v;
        }
        if let Some(v) = get("WEAVIATE_API_KEY") {
            weaviate.api_key = Some(v);
        }
        if let Some(v) = get("WEAVIATE_CLASS") {
            weaviate.class_name = v;
        }

        let redis = &mut self.backends.redis;
        if let Some(v) = get("REDIS_HOST") {
            redis.host = v;
        }
        if let Some(v) = get("REDIS_PORT") {
            redis.port = parse_port("REDIS_PORT", &v)?;
        }
        if let Some(v) = get("REDIS_PASSWORD") {
            redis.password = Some(v);
        }
        if let Some(v) = get("REDIS_INDEX") {
            redis.index_name = v;
        }

        let pg = &mut self.backends.pgvector;
        if let Some(v) = get("POSTGRES_HOST") {
            pg.host = v;
        }
        if let Some(v) = get("POSTGRES_PORT") {
            pg.port = parse_port("POSTGRES_PORT", &v)?;
        }
        if let Some(v) = get("POSTGRES_USER") {
            pg.user = Some(v);
        }
        if let Some(v) = get("POSTGRES_PASSWORD") {
            pg.password = Some(v);
        }
        if let Some(v) = get("POSTGRES_DB") {
            pg.database = v;
        }
        if let Some(v) = get("POSTGRES_TABLE") {
            pg.table = v;
        }

        let neo4j = &mut self.backends.neo4j;
        if let Some(v) = get("NEO4J_URI") {
            neo4j.uri = v;
        }
        if let Some(v) = get("NEO4J_USER") {
            neo4j.user = Some(v);
        }
        if let Some(v) = get("NEO4J_PASSWORD") {
            neo4j.password = Some(v);
        }
        if let Some(v) = get("NEO4J_DATABASE") {
            neo4j.database = v;
        }

        Ok(())
    }

    /// Check that everything a backend needs to connect is present.
    ///
    /// Called at startup for every selected backend so that a missing
    /// credential fails fast instead of in the middle of a run.
    pub fn validate_backend(&self, name: &str) -> std::result::Result<(), ConfigError> {
        let mut missing = Vec::new();
        match name {
            "memory" | "qdrant" | "weaviate" | "redis" => {}
            "pgvector" => {
                let pg = &self.backends.pgvector;
                if pg.user.is_none() {
                    missing.push("POSTGRES_USER");
                }
                if pg.password.is_none() {
                    missing.push("POSTGRES_PASSWORD");
                }
                if !is_identifier(&pg.table) {
                    return Err(ConfigError::InvalidValue {
                        key: "backends.pgvector.table".to_string(),
                        value: pg.table.clone(),
                        reason: "must contain only ASCII letters, digits and underscores"
                            .to_string(),
                    });
                }
            }
            "neo4j" => {
                let neo4j = &self.backends.neo4j;
                if neo4j.user.is_none() {
                    missing.push("NEO4J_USER");
                }
                if neo4j.password.is_none() {
                    missing.push("NEO4J_PASSWORD");
                }
                if !is_identifier(&neo4j.label) || !is_identifier(&neo4j.index_name) {
                    return Err(ConfigError::InvalidValue {
                        key: "backends.neo4j.label".to_string(),
                        value: format!("{}/{}", neo4j.label, neo4j.index_name),
                        reason: "label and index name must be plain identifiers".to_string(),
                    });
                }
            }
            other => return Err(ConfigError::UnknownBackend(other.to_string())),
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::MissingParameters {
                backend: name.to_string(),
                names: missing.into_iter().map(String::from).collect(),
            })
        }
    }
}

fn parse_port(key: &str, value: &str) -> std::result::Result<u16, ConfigError> {
    value
        .trim()
        .parse::<u16>()
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: e.to_string(),
        })
}

/// True if `name` is safe to splice into SQL or Cypher as an identifier.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// Directory for JSON result files.
    pub results_dir: String,
    /// SQLite database holding the results history.
    pub database_path: String,
    /// HTTP API port.
    pub port: u16,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            results_dir: "results".to_string(),
            database_path: "~/.vecgraph/results.db".to_string(),
            port: 8000,
        }
    }
}

/// Benchmark run parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkConfig {
    /// Dataset label recorded in reports.
    pub dataset_name: String,
    /// Embedding model label recorded in reports.
    pub model_name: String,
    /// Backends used by `bench` when none are given on the command line.
    pub backends: Vec<String>,
    /// Neighbours requested per query (the k in Recall@k).
    pub top_k: usize,
    /// Records per `upsert_batch` call.
    pub batch_size: usize,
    /// Seconds allowed for establishing a session.
    pub connect_timeout_secs: u64,
    /// Seconds allowed for any single backend call.
    pub call_timeout_secs: u64,
    /// Retries for connection and timeout errors.
    pub max_retries: u32,
    /// First backoff delay in milliseconds; doubled per attempt.
    pub initial_backoff_ms: u64,
    /// Upper bound for a single backoff delay.
    pub max_backoff_ms: u64,
    /// Drive all backends at the same time instead of one after another.
    pub concurrent: bool,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            dataset_name: "fiqa".to_string(),
            model_name: "all-MiniLM-L6-v2".to_string(),
            backends: ["qdrant", "weaviate", "redis", "pgvector", "neo4j"]
                .into_iter()
                .map(String::from)
                .collect(),
            top_k: 10,
            batch_size: 1000,
            connect_timeout_secs: 10,
            call_timeout_secs: 60,
            max_retries: 3,
            initial_backoff_ms: 250,
            max_backoff_ms: 5_000,
            concurrent: false,
        }
    }
}

/// Connection settings for every backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendsConfig {
    pub memory: MemoryConfig,
    pub qdrant: QdrantConfig,
    pub weaviate: WeaviateConfig,
    pub redis: RedisConfig,
    pub pgvector: PgVectorConfig,
    pub neo4j: Neo4jConfig,
}

/// In-process reference backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub metric: DistanceMetric,
}

/// Qdrant (REST API, default port 6333).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QdrantConfig {
    pub host: String,
    pub port: u16,
    pub api_key: Option<String>,
    pub collection: String,
    pub metric: DistanceMetric,
}

impl QdrantConfig {
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6333,
            api_key: None,
            collection: "vectors".to_string(),
            metric: DistanceMetric::Cosine,
        }
    }
}

/// Weaviate (REST + GraphQL).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeaviateConfig {
    pub url: String,
    pub api_key: Option<String>,
    /// Weaviate class names must start with an upper-case letter.
    pub class_name: String,
    pub metric: DistanceMetric,
}

impl Default for WeaviateConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080".to_string(),
            api_key: None,
            class_name: "Vector".to_string(),
            metric: DistanceMetric::Cosine,
        }
    }
}

/// Redis Stack (RediSearch vector similarity).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub index_name: String,
    pub key_prefix: String,
    pub metric: DistanceMetric,
}

impl RedisConfig {
    pub fn url(&self) -> String {
        match &self.password {
            Some(password) => format!("redis://:{}@{}:{}/", password, self.host, self.port),
            None => format!("redis://{}:{}/", self.host, self.port),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            password: None,
            index_name: "vectors".to_string(),
            key_prefix: "vector:".to_string(),
            metric: DistanceMetric::Cosine,
        }
    }
}

/// PostgreSQL with the pgvector extension.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PgVectorConfig {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: String,
    pub table: String,
    pub metric: DistanceMetric,
}

impl Default for PgVectorConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: None,
            password: None,
            database: "vectordb".to_string(),
            table: "vectors".to_string(),
            metric: DistanceMetric::Cosine,
        }
    }
}

/// Neo4j 5 used in vector mode through the HTTP transactional endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Neo4jConfig {
    /// HTTP endpoint, e.g. `http://localhost:7474`.
    pub uri: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: String,
    pub label: String,
    pub index_name: String,
    pub metric: DistanceMetric,
}

impl Default for Neo4jConfig {
    fn default() -> Self {
        Self {
            uri: "http://localhost:7474".to_string(),
            user: None,
            password: None,
            database: "neo4j".to_string(),
            label: "Doc".to_string(),
            index_name: "doc_emb_idx".to_string(),
            metric: DistanceMetric::Cosine,
        }
    }
}
