//! Database schema migrations.
//!
//! Version 1 creates `benchmark_runs` (one row per benchmark invocation) and
//! `backend_results` (one row per backend outcome within a run).

use rusqlite::Connection;
use tracing::info;

use vecgraph_core::error::VecgraphError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), VecgraphError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| VecgraphError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| VecgraphError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

fn apply_v1(conn: &Connection) -> Result<(), VecgraphError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS benchmark_runs (
            id              TEXT PRIMARY KEY NOT NULL,
            dataset         TEXT NOT NULL,
            model           TEXT NOT NULL,
            records         INTEGER NOT NULL,
            dimension       INTEGER NOT NULL,
            queries         INTEGER NOT NULL,
            top_k           INTEGER NOT NULL,
            batch_size      INTEGER NOT NULL,
            normalized      INTEGER NOT NULL DEFAULT 0,
            started_at      INTEGER NOT NULL,
            finished_at     INTEGER NOT NULL,
            report_json     TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_runs_finished_at
            ON benchmark_runs (finished_at DESC);

        CREATE TABLE IF NOT EXISTS backend_results (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id          TEXT NOT NULL REFERENCES benchmark_runs(id) ON DELETE CASCADE,
            position        INTEGER NOT NULL,
            backend         TEXT NOT NULL,
            status          TEXT NOT NULL CHECK (status IN ('reported', 'failed')),
            metric          TEXT,
            partial         INTEGER NOT NULL DEFAULT 0,
            k               INTEGER,
            recall          REAL,
            ndcg            REAL,
            mrr             REAL,
            precision       REAL,
            queries_answered INTEGER NOT NULL DEFAULT 0,
            mean_ms         REAL,
            p50_ms          REAL,
            p95_ms          REAL,
            qps             REAL,
            index_secs      REAL,
            inserted        INTEGER,
            updated         INTEGER,
            failed_records  INTEGER,
            operation       TEXT,
            error           TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_backend_results_run
            ON backend_results (run_id, position);

        CREATE INDEX IF NOT EXISTS idx_backend_results_backend
            ON backend_results (backend);

        INSERT INTO schema_migrations (version, name) VALUES (1, 'initial_schema');
        ",
    )
    .map_err(|e| VecgraphError::Storage(format!("Migration v1 failed: {}", e)))?;

    Ok(())
}
