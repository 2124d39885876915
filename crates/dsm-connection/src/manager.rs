//! Connection manager façade over a single pool

use std::fmt;
use std::sync::Arc;

use dsm_core::{ConnectionFactory, ConnectionParams, Result};
use tokio_util::sync::CancellationToken;

use crate::pool::{ConnectionPool, PoolConfig, PoolStats};
use crate::session::Session;
use crate::settings::DataSourceSettings;

/// Entry point binding a pool configuration and connection parameters
///
/// The manager is an explicit value: construct it once, pass it (or an
/// `Arc` of it) to whoever needs sessions, and call [`ConnectionManager::close`]
/// when done. It holds no state beyond the pool it delegates to.
pub struct ConnectionManager {
    pool: Arc<ConnectionPool>,
}

impl ConnectionManager {
    /// Create a manager with its pool
    #[tracing::instrument(skip(factory, config), fields(driver = %params.driver, url = %params.url))]
    pub fn new<F: ConnectionFactory>(
        factory: F,
        params: ConnectionParams,
        config: PoolConfig,
    ) -> Result<Self> {
        let pool = ConnectionPool::new(config, factory, params)?;
        tracing::info!(pool_id = %pool.id(), "connection manager ready");
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Create a manager from loaded settings
    pub fn from_settings<F: ConnectionFactory>(
        factory: F,
        settings: &DataSourceSettings,
    ) -> Result<Self> {
        settings.validate()?;
        Self::new(factory, settings.datasource.clone(), settings.pool.clone())
    }

    /// Borrow a connection and wrap it in a session
    pub async fn get_session(&self) -> Result<Session> {
        self.pool.session().await
    }

    /// Borrow a connection, waiting for one to free up until `cancel` fires
    pub async fn get_session_cancellable(&self, cancel: &CancellationToken) -> Result<Session> {
        self.pool.session_cancellable(cancel).await
    }

    /// Replace the pool bounds
    pub fn configure(&self, config: PoolConfig) -> Result<()> {
        self.pool.configure(config)
    }

    /// Open connections until the idle target is met
    pub async fn warm_up(&self) -> Result<usize> {
        self.pool.fill_idle().await
    }

    /// Close every idle connection
    pub async fn reset(&self) -> Result<()> {
        self.pool.reset().await
    }

    /// Close the pool; sessions still open may finish normally
    pub async fn close(&self) -> Result<()> {
        self.pool.close().await
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Snapshot of idle and active counts
    pub fn status(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn config(&self) -> PoolConfig {
        self.pool.config()
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }
}

impl fmt::Display for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[ConnectionManager {}]", self.status())
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("pool", &self.pool)
            .finish()
    }
}
