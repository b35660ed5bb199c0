//! Database connection management.
//!
//! Wraps a single rusqlite Connection in a Mutex for thread-safe access.
//! Configures WAL mode and recommended PRAGMAs on initialization.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::info;

use vecgraph_core::error::VecgraphError;

use crate::migrations;

/// Thread-safe SQLite database wrapper.
///
/// The connection is wrapped in a Mutex since rusqlite Connection is not
/// Sync. The API server and the CLI share one instance through an `Arc`.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a database at the given path.
    ///
    /// Configures WAL mode, synchronous=NORMAL, foreign keys, and runs
    /// all pending migrations.
    pub fn new(path: &Path) -> Result<Self, VecgraphError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)
            .map_err(|e| VecgraphError::Storage(format!("Failed to open database: {}", e)))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA cache_size = -16384;",
        )
        .map_err(|e| VecgraphError::Storage(format!("Failed to set pragmas: {}", e)))?;

        info!("Results database opened at {}", path.display());

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;

        Ok(db)
    }

    /// Open an in-memory database (for testing and `--no-history` runs).
    pub fn in_memory() -> Result<Self, VecgraphError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| VecgraphError::Storage(format!("Failed to open in-memory db: {}", e)))?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| VecgraphError::Storage(format!("Failed to set pragmas: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;

        Ok(db)
    }

    /// Execute a closure with a reference to the underlying connection.
    ///
    /// The mutex is held for the duration of the closure.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, VecgraphError>
    where
        F: FnOnce(&Connection) -> Result<T, VecgraphError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| VecgraphError::Storage(format!("Database lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Like [`with_conn`](Self::with_conn) but with a mutable connection,
    /// needed to open a transaction.
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T, VecgraphError>
    where
        F: FnOnce(&mut Connection) -> Result<T, VecgraphError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| VecgraphError::Storage(format!("Database lock poisoned: {}", e)))?;
        f(&mut conn)
    }
}

// SAFETY: every access to the Connection goes through Mutex::lock(), so it is
// never used from two threads at once.
unsafe impl Send for Database {}
unsafe impl Sync for Database {}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}
