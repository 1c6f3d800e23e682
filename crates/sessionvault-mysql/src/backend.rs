//! MySqlBackend - SessionBackend implementation for MySQL/MariaDB

use async_trait::async_trait;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use std::sync::Arc;
use tracing::info;

use crate::connection::{MySqlSessionConnection, classify};
use crate::queries::Queries;
use sessionvault_core::{
    Clock, Error, PoolConfig, Result, SessionBackend, SessionStore, StoreConfig, StoreMetrics,
    SystemClock,
};

/// Shared handle on a MySQL session table
///
/// Cheap to clone; every clone shares the same pool.
#[derive(Clone)]
pub struct MySqlBackend {
    pool: MySqlPool,
    config: Arc<StoreConfig>,
    queries: Arc<Queries>,
    clock: Arc<dyn Clock>,
    metrics: Option<StoreMetrics>,
}

impl MySqlBackend {
    /// Connect with the default pool settings
    ///
    /// # Errors
    /// - `Error::Config` if `config` is invalid
    /// - `Error::Connection` if the database cannot be reached
    pub async fn connect(database_url: &str, config: StoreConfig) -> Result<Self> {
        Self::connect_with(database_url, config, PoolConfig::default()).await
    }

    /// Connect with custom pool settings
    ///
    /// # Example
    /// ```no_run
    /// # use sessionvault_mysql::MySqlBackend;
    /// # use sessionvault_core::{LockMode, PoolConfig, StoreConfig};
    /// # async fn example() -> sessionvault_core::Result<()> {
    /// let config = StoreConfig::default().with_lock_mode(LockMode::Advisory);
    /// let pool = PoolConfig::default().with_max_connections(50);
    /// let backend = MySqlBackend::connect_with("mysql://app@localhost/app", config, pool).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn connect_with(
        database_url: &str,
        config: StoreConfig,
        pool_config: PoolConfig,
    ) -> Result<Self> {
        config.validate()?;
        pool_config.validate()?;

        let pool = MySqlPoolOptions::new()
            .max_connections(pool_config.max_connections)
            .min_connections(pool_config.min_connections)
            .acquire_timeout(pool_config.acquire_timeout())
            .idle_timeout(Some(pool_config.idle_timeout()))
            .connect(database_url)
            .await
            .map_err(|e| Error::Connection(format!("Failed to connect to MySQL: {}", e)))?;

        info!(
            table = %config.table.table,
            lock_mode = %config.lock_mode,
            "connected MySQL session backend"
        );

        Self::from_pool(pool, config)
    }

    /// Create from an existing pool (useful for testing)
    pub fn from_pool(pool: MySqlPool, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let queries = Queries::new(&config.table);

        Ok(Self {
            pool,
            config: Arc::new(config),
            queries: Arc::new(queries),
            clock: Arc::new(SystemClock),
            metrics: None,
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_metrics(mut self, metrics: StoreMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Check out a bare session connection without a store around it
    pub async fn connection(&self) -> Result<MySqlSessionConnection> {
        let conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| classify("Failed to acquire connection", e))?;
        Ok(MySqlSessionConnection::new(conn, Arc::clone(&self.queries)))
    }
}

#[async_trait]
impl SessionBackend for MySqlBackend {
    type Connection = MySqlSessionConnection;

    async fn session(&self) -> Result<SessionStore<MySqlSessionConnection>> {
        let conn = self.connection().await?;
        let store = SessionStore::with_clock(conn, Arc::clone(&self.config), Arc::clone(&self.clock))?;

        Ok(match &self.metrics {
            Some(metrics) => store.with_metrics(metrics.clone()),
            None => store,
        })
    }

    async fn install_schema(&self) -> Result<()> {
        sqlx::raw_sql(&self.queries.create_table)
            .execute(&self.pool)
            .await
            .map_err(|e| classify("Failed to create session table", e))?;

        info!(table = %self.config.table.table, "session table ready");
        Ok(())
    }
}
