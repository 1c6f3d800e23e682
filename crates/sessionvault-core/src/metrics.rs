//! Metrics for the session store
//!
//! Provides Prometheus metrics for monitoring session locking and storage:
//! - Lock acquisitions by mode and outcome, and time spent waiting
//! - First-write conflicts resolved by re-reading
//! - Rows removed by garbage collection
//! - Storage errors by kind

use prometheus::{
    CounterVec, Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

use crate::config::LockMode;

/// Metrics collector for session stores
#[derive(Clone)]
pub struct StoreMetrics {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Lock acquisitions by mode and outcome
    pub lock_acquisitions_total: CounterVec,
    /// Time from lock request to record loaded
    pub lock_wait_seconds: HistogramVec,
    /// Concurrent first writes resolved by re-reading
    pub first_write_conflicts_total: IntCounter,
    /// Rows removed by garbage collection
    pub gc_rows_deleted_total: IntCounter,
    /// Garbage collection duration
    pub gc_duration_seconds: Histogram,
    /// Storage errors surfaced to callers
    pub storage_errors_total: CounterVec,
}

impl StoreMetrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let lock_acquisitions_total = CounterVec::new(
            Opts::new(
                "session_lock_acquisitions_total",
                "Total number of session lock acquisition attempts",
            ),
            &["mode", "outcome"],
        )?;

        let lock_wait_seconds = HistogramVec::new(
            HistogramOpts::new(
                "session_lock_wait_seconds",
                "Time spent acquiring a session lock and loading the record",
            )
            .buckets(vec![
                0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 50.0,
            ]),
            &["mode"],
        )?;

        let first_write_conflicts_total = IntCounter::with_opts(Opts::new(
            "session_first_write_conflicts_total",
            "Concurrent first writes of the same session resolved by re-reading",
        ))?;

        let gc_rows_deleted_total = IntCounter::with_opts(Opts::new(
            "session_gc_rows_deleted_total",
            "Expired session rows removed by garbage collection",
        ))?;

        let gc_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "session_gc_duration_seconds",
                "Garbage collection sweep duration in seconds",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )?;

        let storage_errors_total = CounterVec::new(
            Opts::new(
                "session_storage_errors_total",
                "Session store errors returned to callers",
            ),
            &["operation", "kind"],
        )?;

        registry.register(Box::new(lock_acquisitions_total.clone()))?;
        registry.register(Box::new(lock_wait_seconds.clone()))?;
        registry.register(Box::new(first_write_conflicts_total.clone()))?;
        registry.register(Box::new(gc_rows_deleted_total.clone()))?;
        registry.register(Box::new(gc_duration_seconds.clone()))?;
        registry.register(Box::new(storage_errors_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            lock_acquisitions_total,
            lock_wait_seconds,
            first_write_conflicts_total,
            gc_rows_deleted_total,
            gc_duration_seconds,
            storage_errors_total,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_lock(&self, mode: LockMode, outcome: &str, wait_secs: f64) {
        let mode = mode.to_string();
        self.lock_acquisitions_total
            .with_label_values(&[mode.as_str(), outcome])
            .inc();
        if outcome == "acquired" {
            self.lock_wait_seconds
                .with_label_values(&[mode.as_str()])
                .observe(wait_secs);
        }
    }

    pub fn record_error(&self, operation: &str, kind: &str) {
        self.storage_errors_total
            .with_label_values(&[operation, kind])
            .inc();
    }

    pub fn record_gc(&self, removed: u64, duration_secs: f64) {
        self.gc_rows_deleted_total.inc_by(removed);
        self.gc_duration_seconds.observe(duration_secs);
    }

    /// Render all metrics in the Prometheus text exposition format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| prometheus::Error::Msg(format!("metrics are not valid UTF-8: {}", e)))
    }
}
