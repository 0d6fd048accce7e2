use crate::storage::StorageManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;

/// Runs [`StorageManager::perform_maintenance`] on a fixed interval until shut down
pub struct MaintenanceScheduler {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<u64>,
}

impl MaintenanceScheduler {
    pub fn start(manager: Arc<StorageManager>, interval: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            // The first tick fires immediately; skip it so startup stays quiet
            ticker.tick().await;
            let mut runs = 0u64;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = manager.perform_maintenance().await;
                        runs += 1;
                        tracing::debug!(?report, runs, "scheduled maintenance ran");
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            tracing::info!("Maintenance scheduler stopping after {} runs", runs);
                            break;
                        }
                    }
                }
            }
            runs
        });

        Self {
            shutdown_tx,
            handle,
        }
    }

    /// Stop the loop and wait for it, returning how many maintenance runs happened
    pub async fn shutdown(self) -> u64 {
        let _ = self.shutdown_tx.send(true);
        match self.handle.await {
            Ok(runs) => runs,
            Err(e) => {
                tracing::error!("Maintenance task failed: {}", e);
                0
            }
        }
    }
}
