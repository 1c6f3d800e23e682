//! MySQL/MariaDB-backed session storage
//!
//! Implements `SessionConnection` and `SessionBackend` on top of a sqlx MySQL
//! pool. Both lock modes are available:
//! - `transactional`: `SELECT ... FOR UPDATE` inside a read-committed
//!   transaction, bounded by `innodb_lock_wait_timeout`
//! - `advisory`: `GET_LOCK`/`RELEASE_LOCK` named locks, no transaction
//!
//! # Example
//! ```no_run
//! # use sessionvault_mysql::MySqlBackend;
//! # use sessionvault_core::{SessionBackend, StoreConfig};
//! # async fn example() -> sessionvault_core::Result<()> {
//! let backend = MySqlBackend::connect("mysql://app@localhost/app", StoreConfig::default()).await?;
//! backend.install_schema().await?;
//!
//! let mut store = backend.session().await?;
//! let payload = store.read("k3j4h5g6").await?;
//! store.write("k3j4h5g6", &payload).await?;
//! # Ok(())
//! # }
//! ```

mod backend;
mod connection;
mod queries;

pub use backend::MySqlBackend;
pub use connection::MySqlSessionConnection;
