//! SQLite-backed session storage for single-node deployments
//!
//! Only the `transactional` lock mode is available. SQLite has no row locks
//! or named locks, so a session read takes the database write lock with
//! `BEGIN IMMEDIATE` and holds it until the session is written or closed.
//! All writers are serialized; readers of other sessions wait at most the
//! configured lock timeout.
//!
//! # Example
//! ```no_run
//! # use sessionvault_sqlite::SqliteBackend;
//! # use sessionvault_core::{PoolConfig, SessionBackend, StoreConfig};
//! # async fn example() -> sessionvault_core::Result<()> {
//! let backend = SqliteBackend::open(
//!     "~/.sessionvault/sessions.db",
//!     StoreConfig::default(),
//!     PoolConfig::default(),
//! )
//! .await?;
//! backend.install_schema().await?;
//! # Ok(())
//! # }
//! ```

mod backend;
mod connection;
mod queries;

pub use backend::SqliteBackend;
pub use connection::SqliteSessionConnection;
