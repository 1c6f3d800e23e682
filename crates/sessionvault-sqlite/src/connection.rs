//! SqliteSessionConnection - SessionConnection on one pooled SQLite connection

use async_trait::async_trait;
use sqlx::Executor;
use sqlx::error::ErrorKind;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{Sqlite, SqliteConnection};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::queries::Queries;
use sessionvault_core::{Error, Result, SessionConnection, SessionRecord};

const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

pub struct SqliteSessionConnection {
    conn: Option<PoolConnection<Sqlite>>,
    queries: Arc<Queries>,
}

impl SqliteSessionConnection {
    pub(crate) fn new(conn: PoolConnection<Sqlite>, queries: Arc<Queries>) -> Self {
        Self {
            conn: Some(conn),
            queries,
        }
    }

    fn handle(&mut self) -> Result<&mut SqliteConnection> {
        self.conn
            .as_deref_mut()
            .ok_or_else(|| Error::Connection("session connection was discarded".to_string()))
    }
}

/// Map a sqlx error onto the store's error kinds.
pub(crate) fn classify(context: &str, err: sqlx::Error) -> Error {
    match &err {
        sqlx::Error::Database(db) => {
            if db.kind() == ErrorKind::UniqueViolation {
                return Error::Conflict(format!("{}: {}", context, db));
            }
            // Extended result codes carry the primary code in the low byte.
            let busy = db
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .is_some_and(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED));
            if busy {
                return Error::LockTimeout(format!("{}: {}", context, db));
            }
            Error::Storage(format!("{}: {}", context, db))
        }
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => Error::Connection(format!("{}: {}", context, err)),
        _ => Error::Storage(format!("{}: {}", context, err)),
    }
}

#[async_trait]
impl SessionConnection for SqliteSessionConnection {
    fn supports_advisory_locks(&self) -> bool {
        false
    }

    async fn begin(&mut self, lock_timeout: Duration) -> Result<()> {
        let busy_ms = u32::try_from(lock_timeout.as_millis()).unwrap_or(u32::MAX);
        let set_busy = format!("PRAGMA busy_timeout = {}", busy_ms);
        let conn = self.handle()?;

        conn.execute(set_busy.as_str())
            .await
            .map_err(|e| classify("Failed to set busy timeout", e))?;

        // IMMEDIATE takes the write lock up front, so two requests can never
        // both read a session and then race to write it.
        conn.execute("BEGIN IMMEDIATE")
            .await
            .map_err(|e| classify("Failed to begin transaction", e))?;

        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.handle()?
            .execute("COMMIT")
            .await
            .map_err(|e| classify("Failed to commit", e))?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.handle()?
            .execute("ROLLBACK")
            .await
            .map_err(|e| classify("Failed to roll back", e))?;
        Ok(())
    }

    async fn acquire_named_lock(&mut self, _name: &str, _timeout: Duration) -> Result<()> {
        Err(Error::Config(
            "SQLite does not support advisory session locks".to_string(),
        ))
    }

    async fn release_named_lock(&mut self, _name: &str) -> Result<()> {
        Err(Error::Config(
            "SQLite does not support advisory session locks".to_string(),
        ))
    }

    async fn fetch(&mut self, id: &str, _for_update: bool) -> Result<Option<SessionRecord>> {
        // The whole database is already write-locked by BEGIN IMMEDIATE.
        let queries = Arc::clone(&self.queries);
        let row: Option<(Vec<u8>, i64)> = sqlx::query_as(&queries.fetch)
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
            drop(conn.detach());
        }
    }
}
