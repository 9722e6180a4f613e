//! Registry of fire-and-forget tasks that should still finish on shutdown.
//!
//! Webhook deliveries are spawned here so the process can give in-flight
//! deliveries a chance to complete before it exits.

// std::sync::Mutex is fine here: the lock is never held across an await.
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Registry for background tasks awaited during graceful shutdown.
#[derive(Clone, Default)]
pub struct BackgroundTasks {
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl BackgroundTasks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a task and track it.
    ///
    /// The handle is registered before this returns, so a task that finishes
    /// immediately is still accounted for.
    pub fn spawn<F>(&self, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);

        let mut guard = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        guard.retain(|h| !h.is_finished());
        guard.push(handle);
    }

    /// Wait for every tracked task, giving up after `grace`.
    ///
    /// Tasks still running when the grace period ends are aborted.
    pub async fn shutdown(&self, grace: Duration) {
        let handles: Vec<_> =
            std::mem::take(&mut *self.handles.lock().unwrap_or_else(PoisonError::into_inner));

        let pending: Vec<_> = handles.into_iter().filter(|h| !h.is_finished()).collect();
        let count = pending.len();
        if count == 0 {
            return;
        }

        info!(count, "Waiting for background tasks to complete");

        let abort_handles: Vec<_> = pending.iter().map(|h| h.abort_handle()).collect();
        let wait_all = async {
            for (i, handle) in pending.into_iter().enumerate() {
                if let Err(e) = handle.await
                    && e.is_panic()
                {
                    warn!(task = i, error = %e, "Background task panicked");
                }
            }
        };

        if tokio::time::timeout(grace, wait_all).await.is_err() {
            warn!(count, "Background tasks did not finish in time, aborting");
            for handle in abort_handles {
                handle.abort();
            }
        } else {
            info!("All background tasks completed");
        }
    }

    /// Number of tasks still running.
    pub fn pending_count(&self) -> usize {
        let mut guard = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        guard.retain(|h| !h.is_finished());
        guard.len()
    }
}
