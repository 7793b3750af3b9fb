//! Routing table updater.
//!
//! Owns the live [`RoutingTable`] and applies three kinds of change to it:
//! streamed events, periodic bulk syncs against the registry, and TTL pruning.
//!
//! While a sync is in flight, incoming events are buffered instead of applied.
//! When the sync finishes (successfully or not) the buffer is replayed in
//! arrival order and the load balancer is configured once. At most one sync
//! runs at a time; a sync requested while another is in flight is skipped.

use std::sync::Arc;

use tcp_routing_api::{EventAction, TcpEvent, TcpRouteMapping};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::auth::TokenFetcher;
use crate::configurer::Configurer;
use crate::error::UpdaterError;
use crate::registry::RouteRegistry;
use crate::routing_table::{routing_entry_from_mapping, RoutingTable};

/// A forced token refresh gets one more attempt after an unauthorized fetch.
const MAX_FETCH_ATTEMPTS: usize = 2;

#[derive(Debug, Default)]
struct UpdaterState {
    routing_table: RoutingTable,
    syncing: bool,
    cached_events: Vec<TcpEvent>,
}

/// Serializes every change to the routing table behind one lock.
pub struct Updater {
    state: Mutex<UpdaterState>,
    /// Held for the whole of a sync.
    sync_guard: Mutex<()>,
    configurer: Arc<dyn Configurer>,
    registry: Arc<dyn RouteRegistry>,
    token_fetcher: Arc<dyn TokenFetcher>,
    /// TTL in seconds for backends registered without one.
    default_ttl: u32,
}

impl Updater {
    pub fn new(
        configurer: Arc<dyn Configurer>,
        registry: Arc<dyn RouteRegistry>,
        token_fetcher: Arc<dyn TokenFetcher>,
        default_ttl: u32,
    ) -> Self {
        Self::with_routing_table(
            RoutingTable::new(),
            configurer,
            registry,
            token_fetcher,
            default_ttl,
        )
    }

    /// Create an updater seeded with an existing table.
    pub fn with_routing_table(
        routing_table: RoutingTable,
        configurer: Arc<dyn Configurer>,
        registry: Arc<dyn RouteRegistry>,
        token_fetcher: Arc<dyn TokenFetcher>,
        default_ttl: u32,
    ) -> Self {
        Self {
            state: Mutex::new(UpdaterState {
                routing_table,
                ..Default::default()
            }),
            sync_guard: Mutex::new(()),
            configurer,
            registry,
            token_fetcher,
            default_ttl,
        }
    }

    /// Apply a streamed event, or buffer it while a sync is running.
    ///
    /// When the table changes, the load balancer is configured before
    /// returning and a configuration failure is returned to the caller.
    pub async fn handle_event(&self, event: TcpEvent) -> Result<(), UpdaterError> {
        let mut state = self.state.lock().await;

        if state.syncing {
            debug!(action = %event.action, port = event.mapping.external_port, "caching event");
            state.cached_events.push(event);
            return Ok(());
        }

        let changed = apply_event(&mut state.routing_table, &event)?;
        if changed {
            debug!("calling configurer");
            self.configurer
                .configure(&state.routing_table)
                .await
                .map_err(UpdaterError::Configure)?;
        }

        Ok(())
    }

    /// Reconcile the live table with the registry's full mapping set.
    ///
    /// Failures are logged; the table is left untouched when the fetch fails.
    /// Returns immediately if another sync is already running.
    pub async fn sync(&self) {
        let Ok(_guard) = self.sync_guard.try_lock() else {
            debug!("sync already in progress, skipping");
            return;
        };
        debug!("bulk sync starting");

        {
            let mut state = self.state.lock().await;
            state.syncing = true;
            state.cached_events.clear();
        }

        let mappings = self.fetch_mappings().await;

        let mut state = self.state.lock().await;
        let mut table_changed = false;

        if let Some(mappings) = mappings {
            debug!(num_routes = mappings.len(), "fetched tcp routes");
            table_changed = apply_fetched(&mut state.routing_table, &mappings);
        }

        let cached_events = std::mem::take(&mut state.cached_events);
        debug!(cache_size = cached_events.len(), "applying cached events");
        for event in &cached_events {
            if let Err(e) = apply_event(&mut state.routing_table, event) {
                warn!(error = %e, "failed to apply cached event");
            }
        }

        if table_changed || !cached_events.is_empty() {
            if let Err(e) = self.configurer.configure(&state.routing_table).await {
                error!(error = %e, "failed to configure after sync");
            }
            debug!(
                size = state.routing_table.size(),
                "applied fetched routes to routing table"
            );
        }

        state.syncing = false;
        debug!("bulk sync completed");
    }

    /// Fetch all mappings, retrying once with a fresh token on an
    /// authorization failure. `None` means the sync should abort.
    async fn fetch_mappings(&self) -> Option<Vec<TcpRouteMapping>> {
        let mut force_refresh = false;

        for _ in 0..MAX_FETCH_ATTEMPTS {
            let token = match self.token_fetcher.fetch_token(force_refresh).await {
                Ok(token) => token,
                Err(e) => {
                    error!(error = %e, "error fetching token");
                    return None;
                }
            };

            match self.registry.tcp_route_mappings(&token).await {
                Ok(mappings) => return Some(mappings),
                Err(e) if e.is_unauthorized() => {
                    error!(error = %e, "error fetching routes");
                    info!("retrying sync with a refreshed token");
                    force_refresh = true;
                }
                Err(e) => {
                    error!(error = %e, "error fetching routes");
                    return None;
                }
            }
        }

        None
    }

    /// Evict expired backends, reconfiguring if anything was removed.
    pub async fn prune_stale_routes(&self) {
        debug!("prune stale routes starting");
        let mut state = self.state.lock().await;

        let before = state.routing_table.backend_count();
        state.routing_table.prune_entries(self.default_ttl);
        let pruned = before - state.routing_table.backend_count();

        if pruned > 0 {
            info!(pruned, "pruned stale backends");
            if let Err(e) = self.configurer.configure(&state.routing_table).await {
                error!(error = %e, "failed to configure after pruning");
            }
        }
        debug!("prune stale routes completed");
    }

    /// Whether a bulk sync is in flight.
    pub async fn syncing(&self) -> bool {
        self.state.lock().await.syncing
    }

    /// Snapshot of the live table.
    pub async fn routing_table(&self) -> RoutingTable {
        self.state.lock().await.routing_table.clone()
    }
}

/// Apply one event to `table`, returning whether a reload is needed.
fn apply_event(table: &mut RoutingTable, event: &TcpEvent) -> Result<bool, UpdaterError> {
    let action: EventAction = event.parsed_action().map_err(|_| {
        info!(action = %event.action, "unknown event action");
        UpdaterError::UnknownEventAction(event.action.clone())
    })?;

    let (key, info) = routing_entry_from_mapping(&event.mapping);
    let changed = match action {
        EventAction::Upsert => table.upsert_backend_server_key(key, info),
        EventAction::Delete => table.delete_backend_server_key(&key, info),
    };
    Ok(changed)
}

/// Fold a full mapping set into `table`.
///
/// Every mapping is upserted into the live table. If the result still has a
/// different number of keys than a table built from the mappings alone, the
/// live table holds routes the registry no longer knows about and is replaced
/// wholesale.
fn apply_fetched(table: &mut RoutingTable, mappings: &[TcpRouteMapping]) -> bool {
    let mut fresh = RoutingTable::new();
    let mut changed = false;

    for mapping in mappings {
        let (key, info) = routing_entry_from_mapping(mapping);
        debug!(routing_key = %key, backend = %info.key(), "creating routing table entry");
        changed |= table.upsert_backend_server_key(key.clone(), info.clone());
        fresh.upsert_backend_server_key(key, info);
    }

    if fresh.size() != table.size() {
        debug!(
            fresh_size = fresh.size(),
            live_size = table.size(),
            "replacing routing table"
        );
        table.replace_entries(fresh);
        changed = true;
    }

    changed
}
