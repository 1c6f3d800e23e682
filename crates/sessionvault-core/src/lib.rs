//! SessionVault Core
//!
//! Engine-agnostic session storage:
//! - `SessionStore`: request-scoped open/read/write/close/destroy/gc
//! - Lock strategies (row-locking transactions or advisory named locks)
//! - The `SessionConnection` and `SessionBackend` traits storage engines implement
//! - Configuration, metrics and the background gc task

pub mod backend;
pub mod clock;
pub mod config;
pub mod connection;
pub mod error;
pub mod gc;
pub mod lock;
pub mod metrics;
pub mod record;
pub mod store;

pub use backend::SessionBackend;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{LockMode, PoolConfig, StoreConfig, TableSchema};
pub use connection::SessionConnection;
pub use error::{Error, Result};
pub use gc::{GcTask, spawn_gc_task};
pub use lock::{AdvisoryLock, LockStrategy, TransactionalLock};
pub use metrics::StoreMetrics;
pub use record::{MAX_SESSION_ID_LEN, SessionRecord, validate_session_id};
pub use store::SessionStore;
