use anyhow::Context;
use serde::{Deserialize, Serialize};
use sessionvault_core::{LockMode, PoolConfig, StoreConfig};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// `mysql://...` or `sqlite:...`
    #[serde(default)]
    pub database_url: Option<String>,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub gc: GcConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcConfig {
    /// Seconds between sweeps in `gc-daemon`
    #[serde(default = "default_gc_interval_secs")]
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Let sqlx log every statement
    #[serde(default)]
    pub log_sql_queries: bool,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_gc_interval_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_sql_queries: false,
        }
    }
}

impl AppConfig {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let config = if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            toml::from_str(&contents)
                .with_context(|| format!("Invalid TOML in {}", path.display()))?
        } else {
            // Default to YAML
            serde_yaml::from_str(&contents)
                .with_context(|| format!("Invalid YAML in {}", path.display()))?
        };

        Ok(config)
    }

    /// Merge environment variables into config (env vars take precedence)
    pub fn merge_env(&mut self) {
        if let Ok(val) = std::env::var("SESSIONVAULT_DATABASE_URL") {
            self.database_url = Some(val);
        }

        if let Ok(val) = std::env::var("SESSIONVAULT_LOCK_MODE") {
            match val.parse::<LockMode>() {
                Ok(mode) => self.store.lock_mode = mode,
                Err(_) => eprintln!(
                    "Warning: Invalid SESSIONVAULT_LOCK_MODE '{}', keeping '{}'",
                    val, self.store.lock_mode
                ),
            }
        }

        if let Ok(val) = std::env::var("SESSIONVAULT_GC_INTERVAL_SECS")
            && let Ok(secs) = val.parse::<u64>()
        {
            self.gc.interval_secs = secs;
        }

        if let Ok(val) = std::env::var("SESSIONVAULT_LOG_LEVEL") {
            self.logging.level = val;
        }

        if let Ok(val) = std::env::var("SESSIONVAULT_LOG_SQL_QUERIES")
            && let Ok(enabled) = val.parse::<bool>()
        {
            self.logging.log_sql_queries = enabled;
        }
    }
}

fn default_gc_interval_secs() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}
