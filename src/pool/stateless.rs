use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::config::{BackendConfig, Endpoint, PoolConfig};

use super::connection::{BackendConnection, ConnectionError};

/// Configuration for stateless pool
#[derive(Debug, Clone)]
pub struct StatelessPoolConfig {
    /// Maximum number of connections borrowed at once
    pub max_open: usize,
    /// Maximum number of idle connections to keep
    pub max_idle: usize,
    /// Maximum connection age before recycling
    pub max_age: Duration,
    /// Maximum idle time before closing
    pub max_idle_time: Duration,
}

impl Default for StatelessPoolConfig {
    fn default() -> Self {
        Self::from(&PoolConfig::default())
    }
}

impl From<&PoolConfig> for StatelessPoolConfig {
    fn from(config: &PoolConfig) -> Self {
        Self {
            max_open: config.max_open.max(1),
            max_idle: config.max_idle,
            max_age: Duration::from_secs(config.max_age_secs),
            max_idle_time: Duration::from_secs(config.max_idle_time_secs),
        }
    }
}

/// A pool of status-query connections to one node
///
/// Connections carry no session state, so they are borrowed for one
/// evaluation and handed back as-is. At most `max_open` are borrowed at a
/// time; callers past the cap wait up to the connect timeout for a slot.
pub struct StatelessPool {
    config: StatelessPoolConfig,
    backend_config: Arc<BackendConfig>,
    endpoint: Endpoint,
    /// Idle connections, most recently returned at the back
    idle: Mutex<VecDeque<BackendConnection>>,
    /// One permit per borrowed connection
    slots: Arc<Semaphore>,
}

impl StatelessPool {
    pub fn new(
        backend_config: Arc<BackendConfig>,
        endpoint: Endpoint,
        pool_config: StatelessPoolConfig,
    ) -> Arc<Self> {
        let slots = Arc::new(Semaphore::new(pool_config.max_open));
        Arc::new(Self {
            config: pool_config,
            backend_config,
            endpoint,
            idle: Mutex::new(VecDeque::new()),
            slots,
        })
    }

    /// Borrow a connection
    ///
    /// Reuses the freshest idle connection that is within its age limits and
    /// still answers a ping, otherwise opens a new one. The server may have
    /// hung up on an idle connection at any time (restart, `wait_timeout`).
    pub async fn get(self: &Arc<Self>) -> Result<PooledConnection, ConnectionError> {
        let timeout = self.backend_config.connect_timeout();
        let permit = tokio::time::timeout(timeout, self.slots.clone().acquire_owned())
            .await
            .map_err(|_| {
                ConnectionError::Timeout(format!(
                    "waiting for one of {} connection slots",
                    self.config.max_open
                ))
            })?
            .map_err(|_| ConnectionError::Disconnected)?;

        while let Some(mut conn) = self.take_idle() {
            if !conn.ping().await {
                debug!("Idle connection failed ping, discarding");
                continue;
            }
            conn.acquire();
            debug!("Reusing idle connection");
            return Ok(PooledConnection::new(conn, self.clone(), permit));
        }

        debug!("Creating new connection");
        let mut conn = BackendConnection::connect(&self.backend_config, &self.endpoint).await?;
        conn.acquire();
        Ok(PooledConnection::new(conn, self.clone(), permit))
    }

    fn take_idle(&self) -> Option<BackendConnection> {
        let mut idle = self.idle.lock();
        while let Some(conn) = idle.pop_back() {
            if conn.is_expired(self.config.max_age) {
                debug!("Connection expired, discarding");
                retire(conn);
                continue;
            }
            if conn.is_idle_too_long(self.config.max_idle_time) {
                debug!("Connection idle too long, discarding");
                retire(conn);
                continue;
            }
            return Some(conn);
        }
        None
    }

    /// Return a connection to the pool
    ///
    /// Broken or expired connections and anything beyond `max_idle` are dropped.
    fn put(&self, mut conn: BackendConnection) {
        conn.release();

        if !conn.is_usable() {
            debug!("Connection not usable, discarding");
            return;
        }

        if conn.is_expired(self.config.max_age) {
            debug!("Connection expired, discarding");
            retire(conn);
            return;
        }

        let mut idle = self.idle.lock();
        if idle.len() >= self.config.max_idle {
            drop(idle);
            debug!("Pool full, discarding connection");
            retire(conn);
            return;
        }

        idle.push_back(conn);
        debug!(idle_count = idle.len(), "Returned connection to pool");
    }

    /// Get current number of idle connections
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// Close all idle connections, telling the server first
    pub async fn close_all(&self) {
        let drained: Vec<_> = self.idle.lock().drain(..).collect();
        for conn in drained {
            conn.quit().await;
        }
        debug!("Closed all idle connections");
    }
}

/// Say goodbye to a healthy connection we no longer want, in the background
fn retire(conn: BackendConnection) {
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        handle.spawn(conn.quit());
    }
}

/// A borrowed connection; handed back to the pool on drop
pub struct PooledConnection {
    conn: Option<BackendConnection>,
    pool: Arc<StatelessPool>,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    fn new(conn: BackendConnection, pool: Arc<StatelessPool>, permit: OwnedSemaphorePermit) -> Self {
        Self {
            conn: Some(conn),
            pool,
            _permit: permit,
        }
    }

    /// Run a text query on the borrowed connection
    pub async fn query(
        &mut self,
        sql: &str,
    ) -> Result<Vec<crate::protocol::TextRow>, ConnectionError> {
        match self.conn.as_mut() {
            Some(conn) => conn.query(sql).await,
            None => Err(ConnectionError::Disconnected),
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.put(conn);
        }
    }
}
