//! Per-session lock strategies
//!
//! A lock strategy decides how a request obtains exclusive access to a session
//! id and how that access is given up again. The session store only talks to
//! the `LockStrategy` trait; which variant is used is fixed at construction
//! from `StoreConfig::lock_mode`.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

use crate::{Result, config::LockMode, connection::SessionConnection};

/// MySQL rejects lock names longer than this.
const MAX_LOCK_NAME_LEN: usize = 64;

#[async_trait]
pub trait LockStrategy: Send + fmt::Debug {
    fn mode(&self) -> LockMode;

    /// Whether reads must take a row-level exclusive lock
    fn locks_rows(&self) -> bool;

    /// Whether anything is currently held that `release` would give up
    fn is_held(&self) -> bool;

    /// Obtain exclusive access to `id`, waiting at most the configured timeout.
    async fn acquire(&mut self, conn: &mut dyn SessionConnection, id: &str) -> Result<()>;

    /// Give up everything held after a successful unit of work.
    async fn release(&mut self, conn: &mut dyn SessionConnection) -> Result<()>;

    /// Give up everything held after a failure, discarding uncommitted changes.
    async fn abort(&mut self, conn: &mut dyn SessionConnection) -> Result<()>;
}

/// Build the strategy for `mode`. `namespace` scopes advisory lock names,
/// normally the table name.
pub fn for_mode(mode: LockMode, namespace: &str, timeout: Duration) -> Box<dyn LockStrategy> {
    match mode {
        LockMode::Transactional => Box::new(TransactionalLock::new(timeout)),
        LockMode::Advisory => Box::new(AdvisoryLock::new(namespace, timeout)),
    }
}

/// Row lock inside a read-committed transaction.
///
/// Read committed is required: under repeatable read, readers of the same row
/// on different connections deadlock against each other's inserts.
#[derive(Debug)]
pub struct TransactionalLock {
    timeout: Duration,
    open: bool,
}

impl TransactionalLock {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            open: false,
        }
    }
}

#[async_trait]
impl LockStrategy for TransactionalLock {
    fn mode(&self) -> LockMode {
        LockMode::Transactional
    }

    fn locks_rows(&self) -> bool {
        true
    }

    fn is_held(&self) -> bool {
        self.open
    }

    async fn acquire(&mut self, conn: &mut dyn SessionConnection, id: &str) -> Result<()> {
        // Several reads in one request share a transaction; the row lock
        // itself is taken by the FOR UPDATE read that follows.
        if self.open {
            return Ok(());
        }
        conn.begin(self.timeout).await?;
        self.open = true;
        debug!(session_id = id, "began session transaction");
        Ok(())
    }

    async fn release(&mut self, conn: &mut dyn SessionConnection) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        // A failed COMMIT leaves nothing to roll back, so the flag goes first.
        self.open = false;
        conn.commit().await?;
        debug!("committed session transaction");
        Ok(())
    }

    async fn abort(&mut self, conn: &mut dyn SessionConnection) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        conn.rollback().await?;
        debug!("rolled back session transaction");
        Ok(())
    }
}

/// Named engine mutex held outside any transaction.
///
/// Every acquire queues one release; all queued releases are executed, in
/// acquisition order, the next time the lock is released or aborted.
#[derive(Debug)]
pub struct AdvisoryLock {
    namespace: String,
    timeout: Duration,
    pending: Vec<String>,
}

impl AdvisoryLock {
    pub fn new(namespace: impl Into<String>, timeout: Duration) -> Self {
        Self {
            namespace: namespace.into(),
            timeout,
            pending: Vec::new(),
        }
    }

    /// Engine-wide lock name for a session id.
    ///
    /// Session ids may be longer than the engine allows for lock names, so
    /// the name is a digest of the namespace and id.
    pub fn lock_name(&self, id: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.namespace.as_bytes());
        hasher.update([0u8]);
        hasher.update(id.as_bytes());
        let digest = hasher.finalize();

        let name = format!("sessionvault:{}", hex::encode(&digest[..24]));
        debug_assert!(name.len() <= MAX_LOCK_NAME_LEN);
        name
    }

    /// Number of releases queued for the next `release`/`abort`
    pub fn pending_releases(&self) -> usize {
        self.pending.len()
    }

    async fn drain(&mut self, conn: &mut dyn SessionConnection) -> Result<()> {
        let pending = std::mem::take(&mut self.pending);
        let mut first_error = None;

        // Each queued release runs exactly once, even if an earlier one failed.
        for name in pending {
            match conn.release_named_lock(&name).await {
                Ok(()) => debug!(lock = %name, "released advisory session lock"),
                Err(e) => {
                    warn!(lock = %name, error = %e, "failed to release advisory session lock");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl LockStrategy for AdvisoryLock {
    fn mode(&self) -> LockMode {
        LockMode::Advisory
    }

    fn locks_rows(&self) -> bool {
        false
    }

    fn is_held(&self) -> bool {
        !self.pending.is_empty()
    }

    async fn acquire(&mut self, conn: &mut dyn SessionConnection, id: &str) -> Result<()> {
        let name = self.lock_name(id);
        conn.acquire_named_lock(&name, self.timeout).await?;
        debug!(session_id = id, lock = %name, "acquired advisory session lock");
        self.pending.push(name);
        Ok(())
    }

    async fn release(&mut self, conn: &mut dyn SessionConnection) -> Result<()> {
        self.drain(conn).await
    }

    async fn abort(&mut self, conn: &mut dyn SessionConnection) -> Result<()> {
        self.drain(conn).await
    }
}
