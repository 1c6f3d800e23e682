//! MySqlSessionConnection - SessionConnection on one pooled MySQL connection

use async_trait::async_trait;
use sqlx::Executor;
use sqlx::error::ErrorKind;
use sqlx::mysql::{MySql, MySqlConnection, MySqlDatabaseError};
use sqlx::pool::PoolConnection;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::queries::Queries;
use sessionvault_core::{Error, Result, SessionConnection, SessionRecord};

/// ER_LOCK_WAIT_TIMEOUT
const LOCK_WAIT_TIMEOUT: u16 = 1205;
/// ER_LOCK_DEADLOCK
const LOCK_DEADLOCK: u16 = 1213;

/// Largest value `innodb_lock_wait_timeout` accepts.
const MAX_LOCK_WAIT_SECS: u64 = 1_073_741_824;

/// Session connection backed by a MySQL pool connection
///
/// Transactions are driven with plain `START TRANSACTION`/`COMMIT` statements
/// so that the isolation level and lock wait timeout can be set per
/// transaction.
pub struct MySqlSessionConnection {
    conn: Option<PoolConnection<MySql>>,
    queries: Arc<Queries>,
    /// `begin` changed the session's lock wait timeout and it has not been reset.
    wait_timeout_changed: bool,
}

impl MySqlSessionConnection {
    pub(crate) fn new(conn: PoolConnection<MySql>, queries: Arc<Queries>) -> Self {
        Self {
            conn: Some(conn),
            queries,
            wait_timeout_changed: false,
        }
    }

    fn handle(&mut self) -> Result<&mut MySqlConnection> {
        self.conn
            .as_deref_mut()
            .ok_or_else(|| Error::Connection("session connection was discarded".to_string()))
    }

    /// Put `innodb_lock_wait_timeout` back to the server default so the next
    /// borrower of this pooled connection does not inherit it. The
    /// transaction is already finished, so a failure here only costs the
    /// connection.
    async fn restore_wait_timeout(&mut self) {
        if !self.wait_timeout_changed {
            return;
        }
        let result = match self.handle() {
            Ok(conn) => conn
                .execute("SET SESSION innodb_lock_wait_timeout = DEFAULT")
                .await
                .map(|_| ()),
            Err(_) => return,
        };
        match result {
            Ok(()) => self.wait_timeout_changed = false,
            Err(e) => {
                warn!(error = %e, "failed to reset lock wait timeout, discarding connection");
                self.discard();
            }
        }
    }
}

/// Map a sqlx error onto the store's error kinds.
pub(crate) fn classify(context: &str, err: sqlx::Error) -> Error {
    match &err {
        sqlx::Error::Database(db) => {
            if db.kind() == ErrorKind::UniqueViolation {
                return Error::Conflict(format!("{}: {}", context, db));
            }
            if let Some(mysql) = db.try_downcast_ref::<MySqlDatabaseError>()
                && matches!(mysql.number(), LOCK_WAIT_TIMEOUT | LOCK_DEADLOCK)
            {
                return Error::LockTimeout(format!("{}: {}", context, db));
            }
            Error::Storage(format!("{}: {}", context, db))
        }
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => Error::Connection(format!("{}: {}", context, err)),
        _ => Error::Storage(format!("{}: {}", context, err)),
    }
}

#[async_trait]
impl SessionConnection for MySqlSessionConnection {
    fn supports_advisory_locks(&self) -> bool {
        true
    }

    async fn begin(&mut self, lock_timeout: Duration) -> Result<()> {
        let wait_secs = lock_timeout.as_secs().clamp(1, MAX_LOCK_WAIT_SECS);
        let set_wait = format!("SET SESSION innodb_lock_wait_timeout = {}", wait_secs);
        let conn = self.handle()?;

        conn.execute(set_wait.as_str())
            .await
            .map_err(|e| classify("Failed to set lock wait timeout", e))?;
        self.wait_timeout_changed = true;

        let conn = self.handle()?;
        conn.execute("SET TRANSACTION ISOLATION LEVEL READ COMMITTED")
            .await
            .map_err(|e| classify("Failed to set isolation level", e))?;

        conn.execute("START TRANSACTION")
            .await
            .map_err(|e| classify("Failed to start transaction", e))?;

        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.handle()?
            .execute("COMMIT")
            .await
            .map_err(|e| classify("Failed to commit", e))?;
        self.restore_wait_timeout().await;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.handle()?
            .execute("ROLLBACK")
            .await
            .map_err(|e| classify("Failed to roll back", e))?;
        self.restore_wait_timeout().await;
        Ok(())
    }

    async fn acquire_named_lock(&mut self, name: &str, timeout: Duration) -> Result<()> {
        let wait_secs = i64::try_from(timeout.as_secs()).unwrap_or(i64::MAX);

        let acquired: Option<i64> = sqlx::query_scalar("SELECT GET_LOCK(?, ?)")
            .bind(name)
            .bind(wait_secs)
            .fetch_one(self.handle()?)
            .await
            .map_err(|e| classify("Failed to acquire named lock", e))?;

        match acquired {
            Some(1) => Ok(()),
            Some(_) => Err(Error::LockTimeout(format!(
                "named lock '{}' still held after {}s",
                name, wait_secs
            ))),
            None => Err(Error::Storage(format!(
                "GET_LOCK('{}') returned NULL",
                name
            ))),
        }
    }

    async fn release_named_lock(&mut self, name: &str) -> Result<()> {
        let released: Option<i64> = sqlx::query_scalar("SELECT RELEASE_LOCK(?)")
            .bind(name)
            .fetch_one(self.handle()?)
            .await
            .map_err(|e| classify("Failed to release named lock", e))?;

        // 0 means another connection owns it, NULL that nobody does. Neither
        // leaves anything for this connection to free.
        if released != Some(1) {
            warn!(lock = name, result = ?released, "named lock was not held by this connection");
        }
        Ok(())
    }

    async fn fetch(&mut self, id: &str, for_update: bool) -> Result<Option<SessionRecord>> {
        let queries = Arc::clone(&self.queries);
        let sql = if for_update {
            &queries.fetch_for_update
        } else {
            &queries.fetch
        };

        let row: Option<(Vec<u8>, i64)> = sqlx::query_as(sql)
            .bind(id)
            .fetch_optional(self.handle()?)
            .await
            .map_err(|e| classify("Failed to fetch session", e))?;

        Ok(row.map(|(payload, expires_at)| SessionRecord::with_payload(id, expires_at, payload)))
    }

    async fn insert(&mut self, record: &SessionRecord) -> Result<()> {
        let queries = Arc::clone(&self.queries);
        sqlx::query(&queries.insert)
            .bind(&record.id)
            .bind(record.expires_at)
            .bind(&record.payload)
            .execute(self.handle()?)
            .await
            .map_err(|e| classify("Failed to insert session", e))?;
        Ok(())
    }

    async fn upsert(&mut self, record: &SessionRecord) -> Result<()> {
        let queries = Arc::clone(&self.queries);
        sqlx::query(&queries.upsert)
            .bind(&record.id)
            .bind(record.expires_at)
            .bind(&record.payload)
            .execute(self.handle()?)
            .await
            .map_err(|e| classify("Failed to write session", e))?;
        Ok(())
    }

    async fn delete(&mut self, id: &str) -> Result<u64> {
        let queries = Arc::clone(&self.queries);
        let result = sqlx::query(&queries.delete)
            .bind(id)
            .execute(self.handle()?)
            .await
            .map_err(|e| classify("Failed to delete session", e))?;
        Ok(result.rows_affected())
    }

    async fn delete_expired(&mut self, cutoff: i64) -> Result<u64> {
        let queries = Arc::clone(&self.queries);
        let result = sqlx::query(&queries.delete_expired)
            .bind(cutoff)
            .execute(self.handle()?)
            .await
            .map_err(|e| classify("Failed to delete expired sessions", e))?;
        Ok(result.rows_affected())
    }

    fn discard(&mut self) {
        if let Some(conn) = self.conn.take() {
            debug!("detaching session connection from the pool");
            // Closing the socket makes the server roll back and drop named locks.
            drop(conn.detach());
        }
    }
}
