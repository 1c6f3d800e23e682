//! SqliteBackend - SessionBackend implementation for SQLite

use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

use crate::connection::{SqliteSessionConnection, classify};
use crate::queries::Queries;
use sessionvault_core::{
    Clock, Error, LockMode, PoolConfig, Result, SessionBackend, SessionStore, StoreConfig,
    StoreMetrics, SystemClock,
};

/// Shared handle on a SQLite session table
#[derive(Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
    config: Arc<StoreConfig>,
    queries: Arc<Queries>,
    clock: Arc<dyn Clock>,
    metrics: Option<StoreMetrics>,
}

impl SqliteBackend {
    /// Open (creating if needed) the database file at `path`
    ///
    /// A leading `~` is expanded to the home directory and missing parent
    /// directories are created.
    ///
    /// # Errors
    /// - `Error::Config` if `config` is invalid or asks for advisory locking
    /// - `Error::Connection` if the database cannot be opened
    pub async fn open(
        path: impl AsRef<Path>,
        config: StoreConfig,
        pool_config: PoolConfig,
    ) -> Result<Self> {
        let path = expand_tilde(path.as_ref());

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Storage(format!(
                    "Failed to create directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let options = SqliteConnectOptions::new().filename(&path);
        Self::connect_with(options, config, pool_config).await
    }

    /// Connect using a `sqlite:` URL
    pub async fn connect(
        database_url: &str,
        config: StoreConfig,
        pool_config: PoolConfig,
    ) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| Error::Config(format!("Invalid SQLite URL '{}': {}", database_url, e)))?;
        Self::connect_with(options, config, pool_config).await
    }

    async fn connect_with(
        options: SqliteConnectOptions,
        config: StoreConfig,
        pool_config: PoolConfig,
    ) -> Result<Self> {
        config.validate()?;
        pool_config.validate()?;
        ensure_transactional(&config)?;

        let options = options
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(config.lock_timeout());

        let pool = SqlitePoolOptions::new()
            .max_connections(pool_config.max_connections)
            .min_connections(pool_config.min_connections)
            .acquire_timeout(pool_config.acquire_timeout())
            .idle_timeout(Some(pool_config.idle_timeout()))
            .connect_with(options)
            .await
            .map_err(|e| Error::Connection(format!("Failed to open SQLite database: {}", e)))?;

        info!(table = %config.table.table, "opened SQLite session backend");

        Self::from_pool(pool, config)
    }

    /// Create from an existing pool (useful for testing)
    pub fn from_pool(pool: SqlitePool, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        ensure_transactional(&config)?;
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

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Check out a bare session connection without a store around it
    pub async fn connection(&self) -> Result<SqliteSessionConnection> {
        let conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| classify("Failed to acquire connection", e))?;
        Ok(SqliteSessionConnection::new(conn, Arc::clone(&self.queries)))
    }
}

fn ensure_transactional(config: &StoreConfig) -> Result<()> {
    if config.lock_mode == LockMode::Advisory {
        return Err(Error::Config(
            "SQLite only supports the transactional lock mode".to_string(),
        ));
    }
    Ok(())
}

fn expand_tilde(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).into_owned())
}

#[async_trait]
impl SessionBackend for SqliteBackend {
    type Connection = SqliteSessionConnection;

    async fn session(&self) -> Result<SessionStore<SqliteSessionConnection>> {
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
