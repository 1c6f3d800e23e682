//! Storage-engine primitives consumed by the session store
//!
//! A `SessionConnection` wraps exactly one pooled database connection. It is
//! owned by a single request and never shared.

use async_trait::async_trait;
use std::time::Duration;

use crate::{Result, record::SessionRecord};

/// Per-request database connection
///
/// Implementations:
/// - `MySqlSessionConnection`: MySQL/MariaDB, row locks and named locks
/// - `SqliteSessionConnection`: SQLite, database-level write lock only
///
/// Errors must already be classified: a unique-key violation is reported as
/// `Error::Conflict`, a lock wait that ran out as `Error::LockTimeout`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionConnection: Send {
    /// Whether `acquire_named_lock`/`release_named_lock` are available
    fn supports_advisory_locks(&self) -> bool;

    /// Start a read-committed transaction whose lock waits give up after
    /// `lock_timeout`.
    async fn begin(&mut self, lock_timeout: Duration) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;

    /// Acquire an engine-wide named mutex, waiting at most `timeout`.
    ///
    /// # Errors
    /// - `Error::LockTimeout` if another connection still holds it
    async fn acquire_named_lock(&mut self, name: &str, timeout: Duration) -> Result<()>;

    async fn release_named_lock(&mut self, name: &str) -> Result<()>;

    /// Load a record by id. With `for_update` the row is locked exclusively
    /// until the current transaction ends.
    async fn fetch(&mut self, id: &str, for_update: bool) -> Result<Option<SessionRecord>>;

    /// Insert a new record.
    ///
    /// # Errors
    /// - `Error::Conflict` if a record with the same id already exists
    async fn insert(&mut self, record: &SessionRecord) -> Result<()>;

    /// Insert or update payload and expiry. The stored expiry never decreases.
    async fn upsert(&mut self, record: &SessionRecord) -> Result<()>;

    /// Delete a record, returning the number of rows removed.
    async fn delete(&mut self, id: &str) -> Result<u64>;

    /// Delete every record whose expiry is strictly older than `cutoff`.
    async fn delete_expired(&mut self, cutoff: i64) -> Result<u64>;

    /// Drop the underlying connection without handing it back to the pool.
    ///
    /// Closing the connection makes the engine roll back any open transaction
    /// and free any named lock it held. Every later call fails with
    /// `Error::Connection`.
    fn discard(&mut self);
}
