//! TCP router
//!
//! Control plane for an HAProxy TCP edge router.
//!
//! This service:
//! - Subscribes to TCP route events from the routing registry
//! - Periodically bulk-syncs all TCP routes
//! - Prunes backends whose TTL has expired
//! - Writes the HAProxy config and runs the reload script on change

use std::sync::Arc;

use anyhow::{bail, Result};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tcp_router::haproxy::ScriptRunner;
use tcp_router::{
    syncer, Config, Configurer, HaproxyConfigurer, NoopTokenFetcher, OAuthTokenFetcher,
    PortChecker, RouteRegistry, RoutingApiClient, TokenFetcher, Updater, Watcher,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to TCP_ROUTER_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting tcp router");
    info!(
        routing_api_url = %config.routing_api_url,
        auth_enabled = config.oauth.is_some(),
        haproxy_config = %config.haproxy_config.display(),
        sync_interval_secs = config.sync_interval.as_secs(),
        default_route_expiry_secs = config.default_route_expiry.as_secs(),
        "Configuration loaded"
    );

    let script_runner = config.haproxy_reloader.clone().map(ScriptRunner::new);
    let configurer: Arc<dyn Configurer> = Arc::new(HaproxyConfigurer::new(
        &config.haproxy_base_config,
        &config.haproxy_config,
        script_runner,
    )?);

    let token_fetcher: Arc<dyn TokenFetcher> = match &config.oauth {
        Some(oauth) => Arc::new(OAuthTokenFetcher::new(
            &oauth.token_endpoint,
            oauth.client_name.clone(),
            oauth.client_secret.clone(),
            oauth.token_expiration_buffer,
        )?),
        None => {
            info!("Routing api auth disabled");
            Arc::new(NoopTokenFetcher)
        }
    };

    let registry: Arc<dyn RouteRegistry> = Arc::new(RoutingApiClient::new(&config.routing_api_url)?);

    let port_checker = PortChecker::new(Arc::clone(&registry), Arc::clone(&token_fetcher));
    check_ports(&port_checker, &config).await?;

    let updater = Arc::new(Updater::new(
        configurer,
        Arc::clone(&registry),
        Arc::clone(&token_fetcher),
        config.default_ttl_secs(),
    ));

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (sync_tx, sync_rx) = mpsc::channel(1);

    let watcher = Watcher::new(
        registry,
        token_fetcher,
        Arc::clone(&updater),
        sync_rx,
        config.subscription_retry_interval,
    );
    let watcher_handle = tokio::spawn(watcher.run(shutdown_rx.clone()));

    let syncer_handle = tokio::spawn(syncer::run_syncer(
        config.sync_interval,
        sync_tx,
        shutdown_rx.clone(),
    ));

    let pruner_handle = tokio::spawn(syncer::run_pruner(
        Arc::clone(&updater),
        config.stale_route_check_interval,
        shutdown_rx,
    ));

    // Wait for shutdown signal
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Received shutdown signal");

    // Signal shutdown to all workers
    let _ = shutdown_tx.send(true);

    for (name, handle) in [
        ("watcher", watcher_handle),
        ("syncer", syncer_handle),
        ("pruner", pruner_handle),
    ] {
        if let Err(e) = handle.await {
            error!(task = name, error = %e, "Worker task failed");
        }
    }

    info!("TCP router shutdown complete");
    Ok(())
}

/// Compare router group ports with reserved system ports. Only a conflict
/// with `fail_on_router_port_conflicts` set stops startup.
async fn check_ports(port_checker: &PortChecker, config: &Config) -> Result<()> {
    let (should_exit, result) = port_checker
        .check(&config.reserved_system_component_ports)
        .await;

    match result {
        Ok(()) => info!("router-group-port-checker-success: No conflicting router group ports."),
        Err(e) if should_exit && config.fail_on_router_port_conflicts => {
            error!(error = %e, "router-group-port-checker-failure: Exiting now.");
            bail!("router group ports conflict with reserved system component ports: {e}");
        }
        Err(e) if should_exit => {
            warn!(
                error = %e,
                "router-group-port-checker-failure: WARNING! In the future this will cause tcp_router to not start."
            );
        }
        Err(e) => error!(error = %e, "router-group-port-checker-error"),
    }

    Ok(())
}
