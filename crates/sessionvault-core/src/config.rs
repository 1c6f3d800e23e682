//! Store, table and connection pool configuration

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::{Error, Result};

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,63}$").expect("valid identifier regex"));

/// How concurrent requests for the same session are serialized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockMode {
    /// Row lock (`SELECT ... FOR UPDATE`) inside a read-committed transaction.
    /// Requires a transactional table engine.
    #[default]
    Transactional,
    /// Named engine-wide mutex held outside any transaction.
    Advisory,
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Transactional => write!(f, "transactional"),
            LockMode::Advisory => write!(f, "advisory"),
        }
    }
}

impl std::str::FromStr for LockMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "transactional" => Ok(LockMode::Transactional),
            "advisory" => Ok(LockMode::Advisory),
            other => Err(Error::Config(format!(
                "unknown lock mode '{}', expected 'transactional' or 'advisory'",
                other
            ))),
        }
    }
}

/// Table and column names of the session table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    #[serde(default = "default_table")]
    pub table: String,

    #[serde(default = "default_id_column")]
    pub id_column: String,

    #[serde(default = "default_expiry_column")]
    pub expiry_column: String,

    #[serde(default = "default_data_column")]
    pub data_column: String,
}

impl Default for TableSchema {
    fn default() -> Self {
        Self {
            table: default_table(),
            id_column: default_id_column(),
            expiry_column: default_expiry_column(),
            data_column: default_data_column(),
        }
    }
}

impl TableSchema {
    /// Names are interpolated into SQL, so only plain identifiers are allowed.
    pub fn validate(&self) -> Result<()> {
        let names = [
            ("table", &self.table),
            ("id_column", &self.id_column),
            ("expiry_column", &self.expiry_column),
            ("data_column", &self.data_column),
        ];

        for (field, name) in names {
            if !IDENTIFIER.is_match(name) {
                return Err(Error::Config(format!(
                    "{} '{}' is not a valid SQL identifier",
                    field, name
                )));
            }
        }

        if self.id_column == self.expiry_column
            || self.id_column == self.data_column
            || self.expiry_column == self.data_column
        {
            return Err(Error::Config(
                "id, expiry and data columns must have distinct names".to_string(),
            ));
        }

        Ok(())
    }
}

/// Session store behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub lock_mode: LockMode,

    /// Lifetime granted on every create or write, in seconds
    #[serde(default = "default_max_lifetime_secs")]
    pub max_lifetime_secs: u64,

    /// Extra time past expiry before garbage collection removes a row
    #[serde(default = "default_gc_grace_secs")]
    pub gc_grace_secs: u64,

    /// Upper bound on waiting for a session lock
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,

    #[serde(default)]
    pub table: TableSchema,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_mode: LockMode::default(),
            max_lifetime_secs: default_max_lifetime_secs(),
            gc_grace_secs: default_gc_grace_secs(),
            lock_timeout_secs: default_lock_timeout_secs(),
            table: TableSchema::default(),
        }
    }
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lock_mode(mut self, mode: LockMode) -> Self {
        self.lock_mode = mode;
        self
    }

    pub fn with_max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime_secs = lifetime.as_secs();
        self
    }

    pub fn with_gc_grace(mut self, grace: Duration) -> Self {
        self.gc_grace_secs = grace.as_secs();
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout_secs = timeout.as_secs();
        self
    }

    pub fn with_table(mut self, table: TableSchema) -> Self {
        self.table = table;
        self
    }

    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_lifetime_secs)
    }

    pub fn gc_grace(&self) -> Duration {
        Duration::from_secs(self.gc_grace_secs)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    /// Validate the store configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_lifetime_secs == 0 {
            return Err(Error::Config(
                "max_lifetime_secs must be at least 1".to_string(),
            ));
        }

        // An unbounded wait would let a crashed holder wedge every later reader.
        if self.lock_timeout_secs == 0 {
            return Err(Error::Config(
                "lock_timeout_secs must be at least 1".to_string(),
            ));
        }

        if self.lock_timeout_secs > i64::MAX as u64 || self.max_lifetime_secs > i64::MAX as u64 {
            return Err(Error::Config("durations must fit in a signed 64-bit value".to_string()));
        }

        self.table.validate()
    }
}

/// Connection pool settings shared by the SQL backends
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections to maintain
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Timeout for acquiring a connection from the pool
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,

    /// How long a connection can remain idle before being closed
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

impl PoolConfig {
    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_min_connections(mut self, min_connections: u32) -> Self {
        self.min_connections = min_connections;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout_secs = timeout.as_secs();
        self
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(Error::Config("max_connections must be at least 1".to_string()));
        }
        if self.min_connections > self.max_connections {
            return Err(Error::Config(
                "min_connections must not exceed max_connections".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_table() -> String {
    "sessions".to_string()
}

fn default_id_column() -> String {
    "sid".to_string()
}

fn default_expiry_column() -> String {
    "expiry".to_string()
}

fn default_data_column() -> String {
    "data".to_string()
}

fn default_max_lifetime_secs() -> u64 {
    1440 // 24 minutes
}

fn default_gc_grace_secs() -> u64 {
    300
}

fn default_lock_timeout_secs() -> u64 {
    50
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    2
}

fn default_acquire_timeout_secs() -> u64 {
    5
}

fn default_idle_timeout_secs() -> u64 {
    600 // 10 minutes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.lock_mode, LockMode::Transactional);
        assert_eq!(config.max_lifetime(), Duration::from_secs(1440));
        assert_eq!(config.gc_grace(), Duration::from_secs(300));
        assert_eq!(config.lock_timeout(), Duration::from_secs(50));
        assert_eq!(config.table.table, "sessions");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = StoreConfig::new()
            .with_lock_mode(LockMode::Advisory)
            .with_max_lifetime(Duration::from_secs(3600))
            .with_lock_timeout(Duration::from_secs(5));

        assert_eq!(config.lock_mode, LockMode::Advisory);
        assert_eq!(config.max_lifetime_secs, 3600);
        assert_eq!(config.lock_timeout_secs, 5);

        // Other values should remain at defaults
        assert_eq!(config.gc_grace_secs, 300);
    }

    #[test]
    fn test_zero_lock_timeout_rejected() {
        let config = StoreConfig::new().with_lock_timeout(Duration::ZERO);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_zero_lifetime_rejected() {
        let config = StoreConfig::new().with_max_lifetime(Duration::ZERO);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_table_identifiers() {
        let mut schema = TableSchema::default();
        assert!(schema.validate().is_ok());

        schema.table = "app_sessions".to_string();
        assert!(schema.validate().is_ok());

        schema.table = "sessions; DROP TABLE users".to_string();
        assert!(matches!(schema.validate(), Err(Error::Config(_))));

        let schema = TableSchema {
            data_column: "sid".to_string(),
            ..TableSchema::default()
        };
        assert!(matches!(schema.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_lock_mode_parse() {
        assert_eq!("Advisory".parse::<LockMode>().unwrap(), LockMode::Advisory);
        assert_eq!(
            "transactional".parse::<LockMode>().unwrap(),
            LockMode::Transactional
        );
        assert!("mutex".parse::<LockMode>().is_err());
        assert_eq!(LockMode::Advisory.to_string(), "advisory");
    }

    #[test]
    fn test_deserialize_partial_yaml() {
        let yaml = r#"
lock_mode: advisory
max_lifetime_secs: 3600
table:
  table: legacy_sessions
"#;
        let config: StoreConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.lock_mode, LockMode::Advisory);
        assert_eq!(config.max_lifetime_secs, 3600);
        assert_eq!(config.lock_timeout_secs, 50);
        assert_eq!(config.table.table, "legacy_sessions");
        assert_eq!(config.table.id_column, "sid");
    }

    #[test]
    fn test_pool_config() {
        let config = PoolConfig::default()
            .with_max_connections(50)
            .with_min_connections(10)
            .with_acquire_timeout(Duration::from_secs(3));

        assert_eq!(config.max_connections, 50);
        assert_eq!(config.min_connections, 10);
        assert_eq!(config.acquire_timeout(), Duration::from_secs(3));
        assert_eq!(config.idle_timeout(), Duration::from_secs(600));
        assert!(config.validate().is_ok());

        let config = PoolConfig::default().with_max_connections(1).with_min_connections(2);
        assert!(config.validate().is_err());
    }
}
