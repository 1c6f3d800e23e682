//! Pool-level access to a session table

use async_trait::async_trait;

use crate::{Result, connection::SessionConnection, store::SessionStore};

/// A shared, cloneable handle on a session table and its connection pool
///
/// Implementations:
/// - `MySqlBackend`: MySQL/MariaDB
/// - `SqliteBackend`: SQLite
#[async_trait]
pub trait SessionBackend: Send + Sync {
    type Connection: SessionConnection;

    /// Check a connection out of the pool and wrap it in a request-scoped store
    ///
    /// # Errors
    /// - `Error::Connection` if no connection could be acquired
    async fn session(&self) -> Result<SessionStore<Self::Connection>>;

    /// Create the session table if it does not exist yet
    async fn install_schema(&self) -> Result<()>;

    /// Run one garbage collection pass with the configured grace period,
    /// returning the number of rows removed.
    async fn sweep(&self) -> Result<u64> {
        let mut store = self.session().await?;
        store.sweep().await
    }
}
