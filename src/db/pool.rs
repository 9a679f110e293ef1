//! Bounded pool of validated database connections.
//!
//! Every connection handed out is probed with `SELECT 1` first; a failed
//! probe discards the connection and substitutes a freshly created one.
//! Exhaustion never blocks a caller indefinitely: after a bounded wait the
//! pool falls back to creating a connection on demand.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, mpsc};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use turso::{Builder, Connection, Database};

use crate::config::DatabaseConfig;
use crate::error::Result;

/// Busy timeout applied to every connection, so concurrent writers wait for
/// locks instead of failing immediately.
const BUSY_TIMEOUT: Duration = Duration::from_millis(500);

pub struct ConnectionPool {
    db: Database,
    slots: mpsc::Sender<Connection>,
    returns: Mutex<mpsc::Receiver<Connection>>,
    capacity: usize,
    acquire_timeout: Duration,
}

impl ConnectionPool {
    /// Open the database and fill the pool.
    ///
    /// Individual connection failures at startup are logged and shrink the
    /// pool instead of aborting; with zero slots every acquire falls through
    /// to on-demand creation.
    pub async fn open(config: &DatabaseConfig) -> Result<Self> {
        let path = config.path.to_string_lossy();
        let db = Builder::new_local(&path).build().await?;

        let (slots, returns) = mpsc::channel(config.pool_size);

        let pool = Self {
            db,
            slots,
            returns: Mutex::new(returns),
            capacity: config.pool_size,
            acquire_timeout: Duration::from_secs(config.acquire_timeout_secs),
        };

        // WAL once, so pooled connections can read while one writes.
        let setup = pool.fresh()?;
        {
            let mut rows = setup.query("PRAGMA journal_mode=WAL", ()).await?;
            rows.next().await?;
        }
        drop(setup);

        let mut created = 0;
        for slot in 0..pool.capacity {
            match pool.fresh() {
                Ok(conn) => {
                    if probe(&conn).await {
                        // Channel has exactly `capacity` slots; this cannot fill.
                        let _ = pool.slots.try_send(conn);
                        created += 1;
                    } else {
                        warn!(slot, "startup connection failed liveness probe, skipping");
                    }
                }
                Err(e) => {
                    warn!(slot, error = %e, "failed to create startup connection");
                }
            }
        }

        if created == 0 {
            warn!("connection pool is empty, falling back to on-demand connections");
        }
        info!(created, capacity = pool.capacity, "connection pool initialized");

        Ok(pool)
    }

    /// Take a validated connection.
    ///
    /// Waits up to the configured bound for a pooled connection, probes it,
    /// and substitutes a fresh connection when the pool is drained or the
    /// probe fails.
    pub async fn acquire(&self) -> Result<Connection> {
        let pooled = {
            let mut returns = self.returns.lock().await;
            match timeout(self.acquire_timeout, returns.recv()).await {
                Ok(Some(conn)) => Some(conn),
                _ => None,
            }
        };

        if let Some(conn) = pooled {
            if probe(&conn).await {
                return Ok(conn);
            }
            warn!("pooled connection failed liveness probe, replacing");
        }

        self.fresh()
    }

    /// Return a connection to the pool.
    ///
    /// The connection is re-validated first and only kept while under
    /// capacity; otherwise it is closed by dropping it.
    pub async fn release(&self, conn: Connection) {
        if !probe(&conn).await {
            warn!("connection failed liveness probe on release, closing");
            return;
        }
        if self.slots.try_send(conn).is_err() {
            debug!("pool at capacity, closing returned connection");
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            available: self.capacity - self.slots.capacity(),
            capacity: self.capacity,
        }
    }

    fn fresh(&self) -> Result<Connection> {
        let conn = self.db.connect()?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }
}

/// Trivial liveness probe.
async fn probe(conn: &Connection) -> bool {
    match conn.query("SELECT 1", ()).await {
        Ok(mut rows) => rows.next().await.is_ok(),
        Err(_) => false,
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct PoolStats {
    pub available: usize,
    pub capacity: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir, pool_size: usize) -> DatabaseConfig {
        DatabaseConfig {
            path: dir.path().join("pool.db"),
            pool_size,
            acquire_timeout_secs: 1,
        }
    }

    #[tokio::test]
    async fn test_acquire_release_cycle() {
        let dir = TempDir::new().unwrap();
        let pool = ConnectionPool::open(&test_config(&dir, 2)).await.unwrap();
        assert_eq!(pool.stats().available, 2);

        let conn = pool.acquire().await.unwrap();
        assert_eq!(pool.stats().available, 1);

        pool.release(conn).await;
        assert_eq!(pool.stats().available, 2);
    }

    #[tokio::test]
    async fn test_drained_pool_creates_on_demand() {
        let dir = TempDir::new().unwrap();
        let pool = ConnectionPool::open(&test_config(&dir, 1)).await.unwrap();

        let held = pool.acquire().await.unwrap();
        // Pool is drained; this must still succeed within the bounded wait.
        let extra = pool.acquire().await.unwrap();
        assert!(probe(&extra).await);

        // Releasing both keeps only one: the pool is at capacity.
        pool.release(held).await;
        pool.release(extra).await;
        assert_eq!(pool.stats().available, 1);
    }

    #[tokio::test]
    async fn test_open_with_unwritable_path_errors() {
        let config = DatabaseConfig {
            path: PathBuf::from("/nonexistent-dir/sub/pool.db"),
            pool_size: 1,
            acquire_timeout_secs: 1,
        };
        assert!(ConnectionPool::open(&config).await.is_err());
    }
}
