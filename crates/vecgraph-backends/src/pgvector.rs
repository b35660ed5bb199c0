//! PostgreSQL + pgvector adapter.
//!
//! One table `(id TEXT PRIMARY KEY, doc_id TEXT, text TEXT, embedding
//! vector(d))` with an HNSW index using the operator class of the metric.
//! Vectors travel as pgvector text literals (`'[0.1,0.2]'`) cast server-side.

use std::future::Future;

use async_trait::async_trait;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, info, warn};
use vecgraph_core::config::{is_identifier, PgVectorConfig};
use vecgraph_core::{DistanceMetric, RankedResult, Record, ScoredHit, UpsertReport};

use crate::adapter::{check_query, partition_records, BackendAdapter, ClientTimeouts};
use crate::error::{BackendError, Result};

/// Adapter for a pgvector table.
pub struct PgVectorBackend {
    config: PgVectorConfig,
    timeouts: ClientTimeouts,
    client: Option<Client>,
    dimension: Option<usize>,
}

impl std::fmt::Debug for PgVectorBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgVectorBackend")
            .field("host", &self.config.host)
            .field("database", &self.config.database)
            .field("table", &self.config.table)
            .field("connected", &self.client.is_some())
            .finish()
    }
}

/// pgvector operator class for HNSW indexes.
pub fn operator_class(metric: DistanceMetric) -> &'static str {
    match metric {
        DistanceMetric::Cosine => "vector_cosine_ops",
        DistanceMetric::Dot => "vector_ip_ops",
        DistanceMetric::Euclidean => "vector_l2_ops",
    }
}

fn distance_operator(metric: DistanceMetric) -> &'static str {
    match metric {
        DistanceMetric::Cosine => "<=>",
        DistanceMetric::Dot => "<#>",
        DistanceMetric::Euclidean => "<->",
    }
}

/// SQL expression turning the operator's distance into a similarity.
/// `<#>` returns the negated inner product.
fn score_expression(metric: DistanceMetric) -> &'static str {
    match metric {
        DistanceMetric::Cosine => "1 - (embedding <=> $1::text::vector)",
        DistanceMetric::Dot => "(embedding <#> $1::text::vector) * -1",
        DistanceMetric::Euclidean => "-(embedding <-> $1::text::vector)",
    }
}

/// pgvector text literal for a vector.
pub fn vector_literal(vector: &[f32]) -> String {
    let parts: Vec<String> = vector.iter().map(|v| v.to_string()).collect();
    format!("[{}]", parts.join(","))
}

fn map_pg_error(err: tokio_postgres::Error) -> BackendError {
    if err.is_closed() {
        BackendError::Connection(err.to_string())
    } else if let Some(db) = err.as_db_error() {
        BackendError::Request(format!("{} ({})", db.message(), db.code().code()))
    } else {
        BackendError::Connection(err.to_string())
    }
}

impl PgVectorBackend {
    pub fn new(config: PgVectorConfig, timeouts: ClientTimeouts) -> Self {
        Self {
            config,
            timeouts,
            client: None,
            dimension: None,
        }
    }

    fn client(&self) -> Result<&Client> {
        self.client.as_ref().ok_or(BackendError::NotConnected)
    }

    fn index_name(&self) -> String {
        format!("{}_embedding_idx", self.config.table)
    }

    async fn bounded<T, F>(&self, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, tokio_postgres::Error>>,
    {
        match tokio::time::timeout(self.timeouts.request, fut).await {
            Ok(result) => result.map_err(map_pg_error),
            Err(_) => Err(BackendError::Timeout(format!(
                "{} exceeded {:?}",
                what, self.timeouts.request
            ))),
        }
    }

    fn upsert_sql(&self, values: &str) -> String {
        format!(
            "INSERT INTO {table} (id, doc_id, text, embedding) {values} \
             ON CONFLICT (id) DO UPDATE SET doc_id = EXCLUDED.doc_id, \
             text = EXCLUDED.text, embedding = EXCLUDED.embedding \
             RETURNING (xmax = 0) AS inserted",
            table = self.config.table,
            values = values,
        )
    }

    /// Write one batch with a single statement.
    async fn upsert_bulk(&self, records: &[&Record]) -> Result<(usize, usize)> {
        let client = self.client()?;
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        let doc_ids: Vec<&str> = records.iter().map(|r| r.doc_id.as_str()).collect();
        let texts: Vec<&str> = records.iter().map(|r| r.text.as_str()).collect();
        let vectors: Vec<String> = records.iter().map(|r| vector_literal(&r.vector)).collect();

        let sql = self.upsert_sql(
            "SELECT u.id, u.doc_id, u.text, u.embedding::vector \
             FROM unnest($1::text[], $2::text[], $3::text[], $4::text[]) \
             AS u(id, doc_id, text, embedding)",
        );
        let rows = self
            .bounded(
                "bulk upsert",
                client.query(&sql, &[&ids, &doc_ids, &texts, &vectors]),
            )
            .await?;

        let inserted = rows.iter().filter(|row| row.get::<_, bool>(0)).count();
        Ok((inserted, rows.len() - inserted))
    }

    /// Write records one at a time so a bad row only fails itself.
    async fn upsert_each(&self, records: &[&Record], report: &mut UpsertReport) -> Result<()> {
        let client = self.client()?;
        let sql = self.upsert_sql("VALUES ($1, $2, $3, $4::text::vector)");
        let statement = self.bounded("prepare", client.prepare(&sql)).await?;

        for record in records {
            let literal = vector_literal(&record.vector);
            let outcome = self
                .bounded(
                    "upsert",
                    client.query_one(
                        &statement,
                        &[&record.id, &record.doc_id, &record.text, &literal],
                    ),
                )
                .await;
            match outcome {
                Ok(row) if row.get::<_, bool>(0) => report.inserted += 1,
                Ok(_) => report.updated += 1,
                Err(BackendError::Request(reason)) => {
                    warn!(id = %record.id, %reason, "pgvector rejected record");
                    report.record_failure(record.id.clone(), reason);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl BackendAdapter for PgVectorBackend {
    fn name(&self) -> &str {
        "pgvector"
    }

    fn metric(&self) -> DistanceMetric {
        self.config.metric
    }

    fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    async fn connect(&mut self) -> Result<()> {
        if self.client.is_some() {
            return Ok(());
        }
        if !is_identifier(&self.config.table) {
            return Err(BackendError::Config(format!(
                "invalid table name '{}'",
                self.config.table
            )));
        }
        let (Some(user), Some(password)) = (&self.config.user, &self.config.password) else {
            return Err(BackendError::Config(
                "missing POSTGRES_USER or POSTGRES_PASSWORD".to_string(),
            ));
        };

        let mut pg = tokio_postgres::Config::new();
        pg.host(&self.config.host)
            .port(self.config.port)
            .user(user.as_str())
            .password(password.as_str())
            .dbname(&self.config.database)
            .connect_timeout(self.timeouts.connect);

        let connecting = tokio::time::timeout(self.timeouts.connect, pg.connect(NoTls));
        let (client, connection) = match connecting.await {
            Ok(result) => result.map_err(map_pg_error)?,
            Err(_) => {
                return Err(BackendError::Timeout(format!(
                    "connect exceeded {:?}",
                    self.timeouts.connect
                )))
            }
        };
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "PostgreSQL connection closed with error");
            }
        });

        self.client = Some(client);
        info!(
            host = %self.config.host,
            port = self.config.port,
            database = %self.config.database,
            "Connected to PostgreSQL"
        );
        Ok(())
    }

    async fn create_index(&mut self, dimension: usize, metric: DistanceMetric) -> Result<()> {
        let client = self.client()?;
        let table = &self.config.table;

        self.bounded(
            "create extension",
            client.batch_execute("CREATE EXTENSION IF NOT EXISTS vector"),
        )
        .await?;

        let typmod = self
            .bounded(
                "inspect table",
                client.query_opt(
                    "SELECT a.atttypmod FROM pg_attribute a \
                     WHERE a.attrelid = to_regclass($1) AND a.attname = 'embedding' \
                     AND NOT a.attisdropped",
                    &[table],
                ),
            )
            .await?
            .map(|row| row.get::<_, i32>(0));
        if let Some(existing) = typmod.filter(|m| *m > 0) {
            if existing as usize != dimension {
                return Err(BackendError::SchemaConflict(format!(
                    "table '{}' stores vector({}), requested {}",
                    table, existing, dimension
                )));
            }
        }

        let index_name = self.index_name();
        let definition = self
            .bounded(
                "inspect index",
                client.query_opt(
                    "SELECT indexdef FROM pg_indexes WHERE tablename = $1 AND indexname = $2",
                    &[table, &index_name],
                ),
            )
            .await?
            .map(|row| row.get::<_, String>(0));
        if let Some(definition) = definition {
            if !definition.contains(operator_class(metric)) {
                return Err(BackendError::SchemaConflict(format!(
                    "index '{}' was built differently: {}",
                    index_name, definition
                )));
            }
        }

        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {table} (\
                id TEXT PRIMARY KEY, \
                doc_id TEXT NOT NULL, \
                text TEXT NOT NULL DEFAULT '', \
                embedding vector({dimension}) NOT NULL); \
             CREATE INDEX IF NOT EXISTS {index} ON {table} USING hnsw (embedding {ops});",
            table = table,
            dimension = dimension,
            index = index_name,
            ops = operator_class(metric),
        );
        self.bounded("create table", client.batch_execute(&ddl)).await?;
        debug!(table = %table, dimension, "pgvector table ready");

        self.dimension = Some(dimension);
        Ok(())
    }

    async fn upsert_batch(&mut self, records: &[Record]) -> Result<UpsertReport> {
        self.client()?;
        let (valid, mut report) = partition_records(records, self.dimension);
        if valid.is_empty() {
            return Ok(report);
        }

        match self.upsert_bulk(&valid).await {
            Ok((inserted, updated)) => {
                report.inserted += inserted;
                report.updated += updated;
            }
            Err(BackendError::Request(reason)) => {
                debug!(%reason, "Bulk upsert rejected, retrying row by row");
                self.upsert_each(&valid, &mut report).await?;
            }
            Err(e) => return Err(e),
        }
        Ok(report)
    }

    async fn query_top_k(&mut self, vector: &[f32], k: usize) -> Result<RankedResult> {
        let client = self.client()?;
        check_query(vector, k, self.dimension)?;

        let sql = format!(
            "SELECT id, doc_id, {score} AS score FROM {table} \
             ORDER BY embedding {op} $1::text::vector, id LIMIT $2",
            score = score_expression(self.config.metric),
            table = self.config.table,
            op = distance_operator(self.config.metric),
        );
        let literal = vector_literal(vector);
        let limit = k as i64;
        let rows = self
            .bounded("search", client.query(&sql, &[&literal, &limit]))
            .await?;

        let hits = rows
            .iter()
            .map(|row| {
                ScoredHit::new(row.get::<_, String>(0), row.get::<_, f64>(2))
                    .with_doc_id(row.get::<_, String>(1))
            })
            .collect();
        Ok(RankedResult::from_hits(hits, k))
    }

    async fn clear(&mut self) -> Result<()> {
        let client = self.client()?;
        let sql = format!("DROP TABLE IF EXISTS {}", self.config.table);
        self.bounded("drop table", client.batch_execute(&sql)).await?;
        self.dimension = None;
        info!(table = %self.config.table, "Dropped pgvector table");
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.client = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_literal() {
        assert_eq!(vector_literal(&[0.5, -1.0, 0.0]), "[0.5,-1,0]");
    }

    #[test]
    fn test_operator_classes() {
        assert_eq!(operator_class(DistanceMetric::Cosine), "vector_cosine_ops");
        assert_eq!(distance_operator(DistanceMetric::Dot), "<#>");
        assert!(score_expression(DistanceMetric::Euclidean).contains("<->"));
    }

    #[test]
    fn test_upsert_sql_shape() {
        let backend = PgVectorBackend::new(PgVectorConfig::default(), ClientTimeouts::default());
        let sql = backend.upsert_sql("VALUES ($1, $2, $3, $4::text::vector)");
        assert!(sql.starts_with("INSERT INTO vectors (id, doc_id, text, embedding) VALUES"));
        assert!(sql.contains("ON CONFLICT (id) DO UPDATE"));
        assert!(sql.ends_with("RETURNING (xmax = 0) AS inserted"));
        assert_eq!(backend.index_name(), "vectors_embedding_idx");
    }

    #[tokio::test]
    async fn test_connect_requires_credentials() {
        let mut backend = PgVectorBackend::new(PgVectorConfig::default(), ClientTimeouts::default());
        assert!(matches!(backend.connect().await, Err(BackendError::Config(_))));
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_table_name() {
        let config = PgVectorConfig {
            user: Some("postgres".into()),
            password: Some("postgres".into()),
            table: "vectors;drop".into(),
            ..Default::default()
        };
        let mut backend = PgVectorBackend::new(config, ClientTimeouts::default());
        assert!(matches!(backend.connect().await, Err(BackendError::Config(_))));
    }
}
