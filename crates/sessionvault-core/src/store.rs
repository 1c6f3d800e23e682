//! Request-scoped session store
//!
//! A `SessionStore` owns one database connection and one lock strategy for the
//! duration of a single request. The framework calls `read` when the session
//! starts, `write` when it has new state to persist and `close` when the
//! request ends; `close` is also what releases the lock for read-only
//! requests.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::{
    Error, Result,
    clock::{Clock, SystemClock},
    config::{LockMode, StoreConfig},
    connection::SessionConnection,
    lock::{self, LockStrategy},
    metrics::StoreMetrics,
    record::{SessionRecord, expiry_from, secs_i64, validate_session_id},
};

/// Session store for one request
///
/// # Example
/// ```no_run
/// # use sessionvault_core::{SessionConnection, SessionStore};
/// # async fn example<C: SessionConnection>(mut store: SessionStore<C>) -> sessionvault_core::Result<()> {
/// let mut payload = store.read("k3j4h5g6").await?;
/// payload.extend_from_slice(b";visits=2");
/// store.write("k3j4h5g6", &payload).await?;
/// store.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct SessionStore<C: SessionConnection> {
    conn: C,
    lock: Box<dyn LockStrategy>,
    config: Arc<StoreConfig>,
    clock: Arc<dyn Clock>,
    metrics: Option<StoreMetrics>,
    /// Ids read under the currently held lock; `write` is only allowed for these.
    locked_ids: HashSet<String>,
    /// Grace period of a gc requested while the lock was held.
    deferred_gc: Option<Duration>,
}

impl<C: SessionConnection> SessionStore<C> {
    /// Create a store using the wall clock
    ///
    /// # Errors
    /// - `Error::Config` if the configuration is invalid or the connection
    ///   cannot provide the configured lock mode
    pub fn new(conn: C, config: Arc<StoreConfig>) -> Result<Self> {
        Self::with_clock(conn, config, Arc::new(SystemClock))
    }

    pub fn with_clock(conn: C, config: Arc<StoreConfig>, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        if config.lock_mode == LockMode::Advisory && !conn.supports_advisory_locks() {
            return Err(Error::Config(
                "advisory locking is not supported by this storage engine".to_string(),
            ));
        }

        let lock = lock::for_mode(config.lock_mode, &config.table.table, config.lock_timeout());

        Ok(Self {
            conn,
            lock,
            config,
            clock,
            metrics: None,
            locked_ids: HashSet::new(),
            deferred_gc: None,
        })
    }

    pub fn with_metrics(mut self, metrics: StoreMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Whether this store currently holds a session lock
    pub fn holds_lock(&self) -> bool {
        self.lock.is_held()
    }

    /// Nothing to prepare: the connection is supplied at construction.
    pub fn open(&mut self) -> Result<()> {
        Ok(())
    }

    /// Lock the session and return its payload
    ///
    /// Unknown ids get an empty record; expired records read as empty and are
    /// left for garbage collection. The lock stays held until `write` or
    /// `close`.
    ///
    /// # Errors
    /// - `Error::InvalidSessionId` if the id does not fit the key column
    /// - `Error::LockTimeout` if another request held the lock for too long
    /// - `Error::Connection` / `Error::Storage` for database failures
    pub async fn read(&mut self, id: &str) -> Result<Vec<u8>> {
        validate_session_id(id)?;

        let mode = self.lock.mode();
        let started = Instant::now();

        if let Err(e) = self.lock.acquire(&mut self.conn, id).await {
            self.observe_lock(mode, &e, started);
            self.observe_error("read", &e);
            return Err(e);
        }

        match self.load_or_create(id).await {
            Ok(payload) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_lock(mode, "acquired", started.elapsed().as_secs_f64());
                }
                self.locked_ids.insert(id.to_string());
                Ok(payload)
            }
            Err(e) => {
                self.observe_lock(mode, &e, started);
                self.observe_error("read", &e);
                self.abort_after(&e).await;
                Err(e)
            }
        }
    }

    /// Persist a new payload, refresh the expiry and release the lock
    ///
    /// # Errors
    /// - `Error::LockNotHeld` if `read` was not called for `id` first
    pub async fn write(&mut self, id: &str, payload: &[u8]) -> Result<()> {
        validate_session_id(id)?;

        if !self.lock.is_held() || !self.locked_ids.contains(id) {
            let e = Error::LockNotHeld(id.to_string());
            self.observe_error("write", &e);
            return Err(e);
        }

        let expires_at = expiry_from(self.clock.now(), self.config.max_lifetime());
        let record = SessionRecord::with_payload(id, expires_at, payload.to_vec());

        if let Err(e) = self.conn.upsert(&record).await {
            self.observe_error("write", &e);
            self.abort_after(&e).await;
            return Err(e);
        }
        debug!(session_id = id, expires_at, bytes = payload.len(), "wrote session");

        self.release().await
    }

    /// Release any lock still held and run a deferred gc. Idempotent.
    pub async fn close(&mut self) -> Result<()> {
        self.release().await
    }

    /// Delete the session. Deleting an absent session is not an error.
    pub async fn destroy(&mut self, id: &str) -> Result<()> {
        validate_session_id(id)?;

        match self.conn.delete(id).await {
            Ok(removed) => {
                debug!(session_id = id, removed, "destroyed session");
                Ok(())
            }
            Err(e) => {
                self.observe_error("destroy", &e);
                if self.lock.is_held() {
                    self.abort_after(&e).await;
                }
                Err(e)
            }
        }
    }

    /// Remove every record that expired more than `grace` ago
    ///
    /// Returns the number of rows removed. While this store holds a
    /// transactional lock the sweep is deferred until the transaction ends and
    /// 0 is returned; the deferred result is only logged. Advisory locks leave
    /// no transaction open, so the sweep runs right away.
    pub async fn gc(&mut self, grace: Duration) -> Result<u64> {
        if self.lock.is_held() && self.lock.locks_rows() {
            debug!(grace_secs = grace.as_secs(), "deferring gc until session lock is released");
            self.deferred_gc = Some(grace);
            return Ok(0);
        }
        self.sweep_expired(grace).await
    }

    /// `gc` with the configured grace period
    pub async fn sweep(&mut self) -> Result<u64> {
        let grace = self.config.gc_grace();
        self.gc(grace).await
    }

    async fn load_or_create(&mut self, id: &str) -> Result<Vec<u8>> {
        let now = self.clock.now();
        let for_update = self.lock.locks_rows();

        if let Some(record) = self.conn.fetch(id, for_update).await? {
            return Ok(record.into_live_payload(now));
        }

        let record = SessionRecord::new(id, expiry_from(now, self.config.max_lifetime()));
        match self.conn.insert(&record).await {
            Ok(()) => {
                debug!(session_id = id, expires_at = record.expires_at, "created session record");
                Ok(Vec::new())
            }
            Err(Error::Conflict(reason)) => {
                // Absent rows are not locked, so a concurrent first reader can
                // win the insert. Its row is the one to use.
                debug!(session_id = id, %reason, "session created concurrently, re-reading");
                if let Some(metrics) = &self.metrics {
                    metrics.first_write_conflicts_total.inc();
                }
                match self.conn.fetch(id, for_update).await? {
                    Some(record) => Ok(record.into_live_payload(now)),
                    None => {
                        debug!(session_id = id, "concurrently created session is already gone");
                        Ok(Vec::new())
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn release(&mut self) -> Result<()> {
        self.locked_ids.clear();

        if let Err(e) = self.lock.release(&mut self.conn).await {
            warn!(error = %e, "failed to release session lock, discarding connection");
            self.observe_error("release", &e);
            self.conn.discard();
            return Err(e);
        }

        if let Some(grace) = self.deferred_gc.take() {
            match self.sweep_expired(grace).await {
                Ok(removed) => debug!(removed, "deferred gc finished"),
                Err(e) => warn!(error = %e, "deferred gc failed"),
            }
        }

        Ok(())
    }

    /// Give up the lock after `cause`, keeping `cause` as the reported error.
    async fn abort_after(&mut self, cause: &Error) {
        self.locked_ids.clear();
        self.deferred_gc = None;

        if let Err(e) = self.lock.abort(&mut self.conn).await {
            warn!(
                error = %e,
                cause = %cause,
                "failed to release session lock after error, discarding connection"
            );
            self.conn.discard();
        }
    }

    async fn sweep_expired(&mut self, grace: Duration) -> Result<u64> {
        let started = Instant::now();
        let cutoff = self.clock.now().saturating_sub(secs_i64(grace));

        let removed = match self.conn.delete_expired(cutoff).await {
            Ok(removed) => removed,
            Err(e) => {
                self.observe_error("gc", &e);
                return Err(e);
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_gc(removed, started.elapsed().as_secs_f64());
        }
        if removed > 0 {
            info!(removed, cutoff, "garbage collected expired sessions");
        }
        Ok(removed)
    }

    fn observe_lock(&self, mode: LockMode, error: &Error, started: Instant) {
        if let Some(metrics) = &self.metrics {
            let outcome = match error {
                Error::LockTimeout(_) => "timeout",
                _ => "error",
            };
            metrics.record_lock(mode, outcome, started.elapsed().as_secs_f64());
        }
    }

    fn observe_error(&self, operation: &str, error: &Error) {
        if let Some(metrics) = &self.metrics {
            metrics.record_error(operation, error.kind());
        }
    }
}

impl<C: SessionConnection> Drop for SessionStore<C> {
    fn drop(&mut self) {
        // The engine frees row and named locks when the connection closes,
        // so a held lock never reaches the pool.
        if self.lock.is_held() {
            warn!(
                mode = %self.lock.mode(),
                "session store dropped while holding a lock, discarding its connection"
            );
            self.conn.discard();
        }
    }
}
