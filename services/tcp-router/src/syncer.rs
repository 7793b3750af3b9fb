//! Periodic loops: sync requests and stale route pruning.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::updater::Updater;

/// Request a sync immediately and then every `sync_interval`.
///
/// Requests are dropped while one is still pending.
pub async fn run_syncer(
    sync_interval: Duration,
    sync_requests: mpsc::Sender<()>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(sync_interval_secs = sync_interval.as_secs(), "Starting syncer");

    let mut interval = tokio::time::interval(sync_interval);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match sync_requests.try_send(()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(())) => {
                        debug!("sync already in progress");
                    }
                    Err(mpsc::error::TrySendError::Closed(())) => {
                        info!("Sync receiver gone, stopping syncer");
                        break;
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("Syncer shutting down");
                    break;
                }
            }
        }
    }
}

/// Prune stale routes every `check_interval`, starting one interval from now.
pub async fn run_pruner(
    updater: Arc<Updater>,
    check_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        check_interval_secs = check_interval.as_secs(),
        "Starting stale route pruner"
    );

    let start = tokio::time::Instant::now() + check_interval;
    let mut interval = tokio::time::interval_at(start, check_interval);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                updater.prune_stale_routes().await;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("Pruner shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_syncer_requests_immediately_and_drops_when_pending() {
        let (tx, mut rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(run_syncer(Duration::from_secs(60), tx, shutdown_rx));

        // First tick fires immediately.
        assert_eq!(rx.recv().await, Some(()));

        // Two more ticks with nobody draining: only one request fits.
        tokio::time::sleep(Duration::from_secs(121)).await;
        assert_eq!(rx.try_recv(), Ok(()));
        assert!(rx.try_recv().is_err());

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
