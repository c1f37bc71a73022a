//! Connection Pool
//!
//! A small blocking pool over SQLite connections: min 1 / max 10, a 5-second
//! acquire timeout with one retry, and a liveness probe before any connection
//! is handed out. Checked-out connections are returned by a scoped guard on
//! every exit path.

use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use rusqlite::Connection;

use super::StorageError;

pub const POOL_MIN: usize = 1;
pub const POOL_MAX: usize = 10;
pub const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);
pub const CLOSE_DEADLINE: Duration = Duration::from_secs(10);

/// Shared handle to the pool. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    path: PathBuf,
    max: usize,
    state: Mutex<PoolState>,
    available: Condvar,
}

struct PoolState {
    idle: Vec<Connection>,
    /// Connections in existence (idle + checked out).
    total: usize,
    closed: bool,
}

impl ConnectionPool {
    /// Open the pool, eagerly establishing the minimum number of connections.
    pub fn open(path: PathBuf) -> Result<Self, StorageError> {
        let pool = Self {
            inner: Arc::new(PoolInner {
                path,
                max: POOL_MAX,
                state: Mutex::new(PoolState {
                    idle: Vec::new(),
                    total: 0,
                    closed: false,
                }),
                available: Condvar::new(),
            }),
        };

        {
            let mut state = pool.inner.state.lock().expect("pool lock poisoned");
            for _ in 0..POOL_MIN {
                let conn = pool.inner.open_connection()?;
                state.idle.push(conn);
                state.total += 1;
            }
        }

        Ok(pool)
    }

    /// Acquire a connection, waiting up to the acquire timeout.
    ///
    /// Idle connections are liveness-probed before hand-out; a dead connection
    /// is discarded and replaced. Opening a fresh connection is retried once.
    pub fn acquire(&self) -> Result<PooledConn, StorageError> {
        let deadline = Instant::now() + ACQUIRE_TIMEOUT;
        let mut state = self.inner.state.lock().expect("pool lock poisoned");

        loop {
            if state.closed {
                return Err(StorageError::NotConnected);
            }

            while let Some(conn) = state.idle.pop() {
                if probe(&conn) {
                    return Ok(PooledConn {
                        conn: Some(conn),
                        pool: Arc::clone(&self.inner),
                    });
                }
                tracing::warn!("Discarding dead pooled connection");
                state.total -= 1;
            }

            if state.total < self.inner.max {
                state.total += 1;
                // Open outside the lock so waiters are not serialized on connect.
                drop(state);
                let conn = self.inner.open_connection().or_else(|e| {
                    tracing::warn!("Connection open failed, retrying once: {}", e);
                    self.inner.open_connection()
                });
                match conn {
                    Ok(conn) => {
                        return Ok(PooledConn {
                            conn: Some(conn),
                            pool: Arc::clone(&self.inner),
                        });
                    }
                    Err(e) => {
                        let mut state = self.inner.state.lock().expect("pool lock poisoned");
                        state.total -= 1;
                        self.inner.available.notify_one();
                        return Err(e);
                    }
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(StorageError::PoolExhausted);
            }
            let (next, timeout) = self
                .inner
                .available
                .wait_timeout(state, deadline - now)
                .expect("pool lock poisoned");
            state = next;
            if timeout.timed_out() && state.idle.is_empty() && state.total >= self.inner.max {
                return Err(StorageError::PoolExhausted);
            }
        }
    }

    /// Close the pool: reject new acquisitions and wait up to the close
    /// deadline for checked-out connections to come back, then drop everything.
    pub fn close(&self) {
        let deadline = Instant::now() + CLOSE_DEADLINE;
        let mut state = self.inner.state.lock().expect("pool lock poisoned");
        state.closed = true;
        self.inner.available.notify_all();

        while state.idle.len() < state.total {
            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(
                    outstanding = state.total - state.idle.len(),
                    "Pool close deadline reached with connections still checked out"
                );
                break;
            }
            let (next, _) = self
                .inner
                .available
                .wait_timeout(state, deadline - now)
                .expect("pool lock poisoned");
            state = next;
        }

        state.total -= state.idle.len();
        state.idle.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().expect("pool lock poisoned").closed
    }
}

impl PoolInner {
    fn open_connection(&self) -> Result<Connection, StorageError> {
        let conn = Connection::open(&self.path)?;
        configure_connection(&conn)?;
        Ok(conn)
    }
}

/// Apply PRAGMAs shared by every pooled connection.
fn configure_connection(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA cache_size = -64000;
         PRAGMA temp_store = MEMORY;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;",
    )?;
    Ok(())
}

/// Trivial round-trip that tells a live connection from a dead one.
fn probe(conn: &Connection) -> bool {
    conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
        .map(|v| v == 1)
        .unwrap_or(false)
}

/// Scoped connection guard. Returns the connection to the pool on drop,
/// including on panic and early-return paths.
pub struct PooledConn {
    conn: Option<Connection>,
    pool: Arc<PoolInner>,
}

impl Deref for PooledConn {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection already released")
    }
}

impl DerefMut for PooledConn {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection already released")
    }
}

impl Drop for PooledConn {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        let mut state = self.pool.state.lock().expect("pool lock poisoned");
        if state.closed {
            state.total -= 1;
        } else {
            state.idle.push(conn);
        }
        self.pool.available.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_pool() -> (ConnectionPool, TempDir) {
        let dir = TempDir::new().unwrap();
        let pool = ConnectionPool::open(dir.path().join("pool.db")).unwrap();
        (pool, dir)
    }

    #[test]
    fn test_acquire_release_cycle() {
        let (pool, _dir) = temp_pool();
        {
            let conn = pool.acquire().unwrap();
            conn.execute_batch("CREATE TABLE t (x INTEGER)").unwrap();
        }
        // Released connection is reused.
        let conn = pool.acquire().unwrap();
        conn.execute("INSERT INTO t (x) VALUES (1)", []).unwrap();
    }

    #[test]
    fn test_concurrent_checkouts_grow_to_max() {
        let (pool, _dir) = temp_pool();
        let guards: Vec<_> = (0..POOL_MAX).map(|_| pool.acquire().unwrap()).collect();
        assert_eq!(guards.len(), POOL_MAX);
        drop(guards);
        assert!(pool.acquire().is_ok());
    }

    #[test]
    fn test_closed_pool_rejects_acquire() {
        let (pool, _dir) = temp_pool();
        pool.close();
        assert!(matches!(pool.acquire(), Err(StorageError::NotConnected)));
    }

    #[test]
    fn test_guard_returns_on_error_path() {
        let (pool, _dir) = temp_pool();
        fn failing(pool: &ConnectionPool) -> Result<(), StorageError> {
            let conn = pool.acquire()?;
            conn.query_row("SELECT 2", [], |row| row.get::<_, i64>(0))?;
            Err(StorageError::PoolExhausted)
        }
        assert!(failing(&pool).is_err());
        // The guard released its connection; the pool can still grow to max.
        let guards: Vec<_> = (0..POOL_MAX).map(|_| pool.acquire().unwrap()).collect();
        assert_eq!(guards.len(), POOL_MAX);
    }
}
