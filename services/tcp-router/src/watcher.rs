//! Event stream watcher.
//!
//! Keeps a subscription to the registry's TCP route event stream open and
//! feeds each event to the [`Updater`]. Sync requests from the syncer are
//! served here too, each as a spawned [`Updater::sync`]; the updater skips a
//! request that arrives while a sync is still running.

use std::sync::Arc;
use std::time::Duration;

use tcp_routing_api::TcpEvent;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::auth::TokenFetcher;
use crate::registry::{RegistryError, RouteRegistry, TcpEventStream};
use crate::updater::Updater;

pub struct Watcher {
    registry: Arc<dyn RouteRegistry>,
    token_fetcher: Arc<dyn TokenFetcher>,
    updater: Arc<Updater>,
    sync_requests: mpsc::Receiver<()>,
    subscription_retry_interval: Duration,
}

impl Watcher {
    pub fn new(
        registry: Arc<dyn RouteRegistry>,
        token_fetcher: Arc<dyn TokenFetcher>,
        updater: Arc<Updater>,
        sync_requests: mpsc::Receiver<()>,
        subscription_retry_interval: Duration,
    ) -> Self {
        Self {
            registry,
            token_fetcher,
            updater,
            sync_requests,
            subscription_retry_interval,
        }
    }

    /// Run until shutdown.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Starting event watcher");

        let mut stream: Option<TcpEventStream> = None;
        let mut force_refresh = false;
        let mut resubscribe_at = Instant::now();

        loop {
            tokio::select! {
                _ = sleep_until(resubscribe_at), if stream.is_none() => {
                    match self.subscribe(force_refresh).await {
                        Ok(subscribed) => {
                            info!("Subscribed to routing api event stream");
                            stream = Some(subscribed);
                            force_refresh = false;
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to subscribe to routing api event stream");
                            force_refresh = e
                                .downcast_ref::<RegistryError>()
                                .is_some_and(RegistryError::is_unauthorized);
                            resubscribe_at = Instant::now() + self.subscription_retry_interval;
                        }
                    }
                }
                result = next_event(stream.as_mut()) => {
                    match result {
                        Ok(Some(event)) => self.dispatch(event).await,
                        Ok(None) => {
                            warn!("Routing api event stream closed");
                            stream = None;
                            resubscribe_at = Instant::now();
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to get next routing api event");
                            force_refresh = e.is_unauthorized();
                            stream = None;
                            resubscribe_at = Instant::now();
                        }
                    }
                }
                Some(()) = self.sync_requests.recv() => {
                    let updater = Arc::clone(&self.updater);
                    tokio::spawn(async move {
                        updater.sync().await;
                    });
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Event watcher shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn subscribe(&self, force_refresh: bool) -> anyhow::Result<TcpEventStream> {
        let token = self.token_fetcher.fetch_token(force_refresh).await?;
        debug!("Subscribing to routing api event stream");
        Ok(self.registry.tcp_events(&token).await?)
    }

    async fn dispatch(&self, event: TcpEvent) {
        if let Err(e) = self.updater.handle_event(event).await {
            error!(error = %e, "Failed to handle event");
        }
    }
}

async fn next_event(
    stream: Option<&mut TcpEventStream>,
) -> Result<Option<TcpEvent>, RegistryError> {
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}
