//! Persistence Layer
//!
//! Exclusive owner of every persisted row. All other components reach rows
//! through the typed operations on [`Store`]; nothing else touches SQL.
//!
//! The backing store is SQLite with FTS5 for the lexical branch of hybrid
//! search; embeddings live in BLOB columns and cosine distance is computed
//! in-process.

mod graph;
mod logs;
mod memory;
pub mod migrations;
pub mod pool;

use std::path::PathBuf;

use directories::ProjectDirs;

pub use logs::{
    BudgetAlertRow, CostRow, EvaluationRow, FallbackRow, GoldenRun, NewGroundTruth, RetryRow,
};
pub use memory::{EpisodeFilter, InsightQuery, RawTurnQuery, StaleQuery};
pub use pool::{ConnectionPool, PooledConn};

/// Storage error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// Pool or subsystem used before initialization or after shutdown
    #[error("Storage is not connected")]
    NotConnected,
    /// No connection became available within the acquire timeout
    #[error("Connection pool exhausted")]
    PoolExhausted,
    /// Row not found
    #[error("Not found: {0}")]
    NotFound(String),
    /// Domain-rule violation at the storage boundary
    #[error("Invalid argument: {0}")]
    Invalid(String),
    /// Stored data failed to decode (bad blob length, malformed JSON column)
    #[error("Corrupt row: {0}")]
    Corrupt(String),
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Initialization error
    #[error("Initialization error: {0}")]
    Init(String),
}

/// Storage result type
pub type Result<T> = std::result::Result<T, StorageError>;

/// Typed access to every persisted table, backed by the connection pool.
///
/// Cheap to clone; all methods take `&self`, so the MCP layer can share one
/// `Store` across tasks without extra locking.
#[derive(Clone)]
pub struct Store {
    pool: ConnectionPool,
}

impl Store {
    /// Open the store at the given path (or the platform default), applying
    /// any pending migrations.
    pub fn open(db_path: Option<PathBuf>) -> Result<Self> {
        let path = match db_path {
            Some(p) => {
                if let Some(parent) = p.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                p
            }
            None => {
                let proj_dirs = ProjectDirs::from("io", "engram", "core").ok_or_else(|| {
                    StorageError::Init("Could not determine project directories".to_string())
                })?;
                let data_dir = proj_dirs.data_dir();
                std::fs::create_dir_all(data_dir)?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    let perms = std::fs::Permissions::from_mode(0o700);
                    let _ = std::fs::set_permissions(data_dir, perms);
                }
                data_dir.join("engram.db")
            }
        };

        let pool = ConnectionPool::open(path)?;
        {
            let conn = pool.acquire()?;
            migrations::apply_migrations(&conn)?;
        }

        Ok(Self { pool })
    }

    /// Close the pool: new acquisitions fail with `NotConnected`, outstanding
    /// connections are waited for up to the close deadline.
    pub fn close(&self) {
        self.pool.close();
    }

    pub(crate) fn conn(&self) -> Result<PooledConn> {
        self.pool.acquire()
    }
}

/// Decode an optional JSON text column.
pub(crate) fn parse_json_column(
    raw: Option<String>,
    column: &str,
) -> Result<Option<serde_json::Value>> {
    match raw {
        None => Ok(None),
        Some(s) => serde_json::from_str(&s)
            .map(Some)
            .map_err(|e| StorageError::Corrupt(format!("{column}: {e}"))),
    }
}

/// Decode a required JSON text column into a concrete type.
pub(crate) fn parse_json_required<T: serde::de::DeserializeOwned>(
    raw: String,
    column: &str,
) -> Result<T> {
    serde_json::from_str(&raw).map_err(|e| StorageError::Corrupt(format!("{column}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_applies_migrations() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(Some(dir.path().join("engram.db"))).unwrap();
        let conn = store.conn().unwrap();
        let version = migrations::get_current_version(&conn).unwrap();
        assert_eq!(version as usize, migrations::MIGRATIONS.len());
    }

    #[test]
    fn test_closed_store_rejects_access() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(Some(dir.path().join("engram.db"))).unwrap();
        store.close();
        assert!(matches!(store.conn(), Err(StorageError::NotConnected)));
    }

    #[test]
    fn test_reopen_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("engram.db");
        {
            let store = Store::open(Some(path.clone())).unwrap();
            store.close();
        }
        let store = Store::open(Some(path)).unwrap();
        assert!(store.conn().is_ok());
    }
}
