//! SessionVault CLI
//!
//! Schema installation and garbage collection for session tables

mod config;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use sessionvault_core::{SessionBackend, StoreMetrics, spawn_gc_task};
use sessionvault_mysql::MySqlBackend;
use sessionvault_sqlite::SqliteBackend;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::config::{AppConfig, LoggingConfig};

#[derive(Parser)]
#[command(name = "sessionvault")]
#[command(about = "SessionVault - locked session storage for MySQL and SQLite", long_about = None)]
struct Cli {
    /// Path to a YAML or TOML configuration file
    #[arg(short, long, env = "SESSIONVAULT_CONFIG")]
    config: Option<PathBuf>,

    /// Database URL (`mysql://...` or `sqlite:...`), overrides the config file
    #[arg(long)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the session table if it does not exist
    Init,
    /// Remove expired sessions once
    Gc {
        /// Grace period in seconds, defaults to the configured gc_grace_secs
        #[arg(long)]
        grace_secs: Option<u64>,
    },
    /// Remove expired sessions periodically until interrupted
    GcDaemon {
        /// Seconds between sweeps, defaults to the configured gc.interval_secs
        #[arg(long)]
        interval_secs: Option<u64>,

        /// Print Prometheus metrics on shutdown
        #[arg(long, default_value = "false")]
        metrics: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::default(),
    };

    // Environment overrides the file, flags override both
    config.merge_env();
    if let Some(url) = cli.database_url.clone() {
        config.database_url = Some(url);
    }

    init_tracing(&config.logging)?;

    if let Some(path) = &cli.config {
        info!("Loaded configuration from {}", path.display());
    }

    let database_url = config
        .database_url
        .clone()
        .context("No database URL configured; pass --database-url or set SESSIONVAULT_DATABASE_URL")?;

    let metrics = match &cli.command {
        Commands::GcDaemon { metrics: true, .. } => Some(StoreMetrics::new()?),
        _ => None,
    };

    if database_url.starts_with("mysql://") || database_url.starts_with("mariadb://") {
        let mut backend = MySqlBackend::connect_with(
            &database_url,
            config.store.clone(),
            config.pool.clone(),
        )
        .await?;
        if let Some(metrics) = &metrics {
            backend = backend.with_metrics(metrics.clone());
        }
        run(backend, cli.command, &config, metrics).await
    } else if database_url.starts_with("sqlite:") {
        let mut backend =
            SqliteBackend::connect(&database_url, config.store.clone(), config.pool.clone())
                .await?;
        if let Some(metrics) = &metrics {
            backend = backend.with_metrics(metrics.clone());
        }
        run(backend, cli.command, &config, metrics).await
    } else {
        bail!(
            "Unsupported database URL '{}'; expected mysql:// or sqlite:",
            database_url
        )
    }
}

async fn run<B>(
    backend: B,
    command: Commands,
    config: &AppConfig,
    metrics: Option<StoreMetrics>,
) -> anyhow::Result<()>
where
    B: SessionBackend + 'static,
{
    match command {
        Commands::Init => {
            backend.install_schema().await?;
            println!("Session table '{}' is ready", config.store.table.table);
        }
        Commands::Gc { grace_secs } => {
            let removed = match grace_secs {
                Some(secs) => {
                    let mut store = backend.session().await?;
                    store.gc(Duration::from_secs(secs)).await?
                }
                None => backend.sweep().await?,
            };
            println!("Removed {} expired sessions", removed);
        }
        Commands::GcDaemon { interval_secs, .. } => {
            let interval_secs = interval_secs.unwrap_or(config.gc.interval_secs);
            if interval_secs == 0 {
                bail!("gc interval must be at least one second");
            }

            let task = spawn_gc_task(Arc::new(backend), Duration::from_secs(interval_secs));
            shutdown_signal().await;

            let total = task.shutdown().await;
            info!("Gc daemon stopped after removing {} expired sessions", total);

            if let Some(metrics) = metrics {
                print!("{}", metrics.encode()?);
            }
        }
    }

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    let log_level = match logging.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::new(format!("{}", log_level));

    // sqlx logs every statement at debug; keep it quiet unless asked
    if !logging.log_sql_queries {
        match "sqlx=warn".parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => eprintln!("Warning: Failed to set sqlx log filter: {}", e),
        }
    }

    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_gc_daemon() {
        let cli = Cli::try_parse_from([
            "sessionvault",
            "--database-url",
            "sqlite:sessions.db",
            "gc-daemon",
            "--interval-secs",
            "30",
            "--metrics",
        ])
        .unwrap();

        assert_eq!(cli.database_url.as_deref(), Some("sqlite:sessions.db"));
        match cli.command {
            Commands::GcDaemon {
                interval_secs,
                metrics,
            } => {
                assert_eq!(interval_secs, Some(30));
                assert!(metrics);
            }
            _ => panic!("expected gc-daemon"),
        }
    }

    #[test]
    fn test_parse_gc_with_grace() {
        let cli = Cli::try_parse_from(["sessionvault", "gc", "--grace-secs", "0"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Gc {
                grace_secs: Some(0)
            }
        ));
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["sessionvault"]).is_err());
    }

    #[tokio::test]
    async fn test_init_and_gc_against_sqlite() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config = AppConfig::default();
        let path = temp_dir.path().join("cli.db");

        let backend = SqliteBackend::open(&path, config.store.clone(), config.pool.clone())
            .await
            .unwrap();
        run(backend.clone(), Commands::Init, &config, None)
            .await
            .unwrap();
        run(backend, Commands::Gc { grace_secs: None }, &config, None)
            .await
            .unwrap();
    }
}
