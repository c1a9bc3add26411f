//! Background Expiry Reaper
//!
//! Lazy expiry only catches keys somebody reads. The reaper is the other
//! half: a Tokio task that wakes on a fixed interval and purges every entry
//! whose deadline has passed, read or not.
//!
//! The reaper's lifetime is tied to the [`Reaper`] handle. Calling
//! [`Reaper::shutdown`] (or dropping the handle) stops it.

use crate::storage::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

/// How often the reaper scans for expired keys unless configured otherwise.
pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ReaperConfig {
    /// Time between scans
    pub interval: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_REAP_INTERVAL,
        }
    }
}

/// A handle to the running reaper.
///
/// When this handle is dropped, the reaper task will be stopped.
#[derive(Debug)]
pub struct Reaper {
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl Reaper {
    /// Starts the reaper as a background task.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use gedis::storage::{Reaper, ReaperConfig, Store};
    /// use std::sync::Arc;
    ///
    /// let store = Arc::new(Store::new());
    /// let reaper = Reaper::start(Arc::clone(&store), ReaperConfig::default());
    ///
    /// // ... serve traffic ...
    ///
    /// reaper.shutdown().await;
    /// ```
    pub fn start(store: Arc<Store>, config: ReaperConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let interval_ms = config.interval.as_millis();
        let task = tokio::spawn(reaper_loop(store, config, shutdown_rx));

        info!(interval_ms = interval_ms, "Background expiry reaper started");

        Self {
            shutdown_tx,
            task: Some(task),
        }
    }

    /// Signals the reaper to stop without waiting for it.
    pub fn stop(&self) {
        // Err only means the task is already gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Stops the reaper and waits for its task to finish.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                debug!(error = %e, "Expiry reaper task ended abnormally");
            }
        }
        info!("Background expiry reaper stopped");
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn reaper_loop(
    store: Arc<Store>,
    config: ReaperConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(config.interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiry reaper received shutdown signal");
                    return;
                }
            }
        }

        let expired = store.purge_expired();

        if expired > 0 {
            debug!(
                expired = expired,
                keys_remaining = store.len(),
                "Expired keys reaped"
            );
        } else {
            trace!("Reaper tick, nothing expired");
        }
    }
}
