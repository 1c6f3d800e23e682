//! Periodic garbage collection
//!
//! Expired rows are removed by a single bulk delete per pass; the task takes
//! no per-session locks.

use std::sync::Arc;
use tokio::time::{Duration, sleep};

use crate::backend::SessionBackend;

/// Handle for the background gc task
pub struct GcTask {
    shutdown_tx: tokio::sync::mpsc::Sender<()>,
    handle: tokio::task::JoinHandle<u64>,
}

impl GcTask {
    /// Signal the gc task to stop and wait for it, returning the total number
    /// of rows it removed.
    pub async fn shutdown(self) -> u64 {
        let _ = self.shutdown_tx.send(()).await;
        match self.handle.await {
            Ok(total) => total,
            Err(e) => {
                tracing::error!("gc task panicked: {}", e);
                0
            }
        }
    }
}

/// Spawn a background task that sweeps expired sessions every `interval`
///
/// Failed passes are logged and retried on the next tick.
pub fn spawn_gc_task<B>(backend: Arc<B>, interval: Duration) -> GcTask
where
    B: SessionBackend + 'static,
{
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);

    let handle = tokio::spawn(async move {
        let mut total = 0u64;

        tracing::info!("Starting session gc task (interval: {}s)", interval.as_secs());

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Session gc task shutting down");
                    break;
                }
                _ = sleep(interval) => {
                    match backend.sweep().await {
                        Ok(removed) => {
                            total += removed;
                            if removed > 0 {
                                tracing::info!("Gc cycle: {} expired sessions removed", removed);
                            }
                        }
                        Err(e) => {
                            tracing::error!("Session gc pass failed: {}", e);
                        }
                    }
                }
            }
        }

        total
    });

    GcTask {
        shutdown_tx,
        handle,
    }
}
