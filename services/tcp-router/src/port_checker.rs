//! Startup check of router group ports.
//!
//! Router groups reserve external port ranges for TCP routes. A range that
//! includes a port used by a co-located system component would let a route
//! shadow that component, so the router looks for overlaps before it starts.

use std::sync::Arc;

use anyhow::anyhow;
use tcp_routing_api::RouterGroup;
use tracing::{debug, warn};

use crate::auth::TokenFetcher;
use crate::registry::RouteRegistry;

/// Attempts for the token fetch and, separately, for the router group fetch.
const MAX_ATTEMPTS: usize = 3;

/// Compares router group reservable ports with reserved system ports.
pub struct PortChecker {
    registry: Arc<dyn RouteRegistry>,
    token_fetcher: Arc<dyn TokenFetcher>,
}

impl PortChecker {
    pub fn new(registry: Arc<dyn RouteRegistry>, token_fetcher: Arc<dyn TokenFetcher>) -> Self {
        Self {
            registry,
            token_fetcher,
        }
    }

    /// Check every router group against `system_component_ports`.
    ///
    /// The flag is set only when an overlap was found; fetch failures come
    /// back as an error with the flag clear.
    pub async fn check(&self, system_component_ports: &[u16]) -> (bool, anyhow::Result<()>) {
        let groups = match self.router_groups().await {
            Ok(groups) => groups,
            Err(e) => return (false, Err(e)),
        };

        let conflicts = find_conflicts(&groups, system_component_ports);
        if conflicts.is_empty() {
            return (false, Ok(()));
        }
        (true, Err(anyhow!(conflicts.join("\n"))))
    }

    async fn router_groups(&self) -> anyhow::Result<Vec<RouterGroup>> {
        let mut last_error = None;
        let mut token = None;
        for attempt in 1..=MAX_ATTEMPTS {
            match self.token_fetcher.fetch_token(false).await {
                Ok(t) => {
                    token = Some(t);
                    break;
                }
                Err(e) => {
                    debug!(attempt, error = %e, "token fetch for port check failed");
                    last_error = Some(e.to_string());
                }
            }
        }
        let Some(token) = token else {
            return Err(anyhow!(
                "error-fetching-uaa-token: {:?}",
                last_error.unwrap_or_default()
            ));
        };

        let mut last_error = String::new();
        for attempt in 1..=MAX_ATTEMPTS {
            match self.registry.router_groups(&token).await {
                Ok(groups) => return Ok(groups),
                Err(e) => {
                    debug!(attempt, error = %e, "router group fetch failed");
                    last_error = e.to_string();
                }
            }
        }
        Err(anyhow!("error-fetching-routing-groups: {last_error:?}"))
    }
}

/// One message per port range that contains reserved ports. Groups with
/// unparsable ranges are skipped.
fn find_conflicts(groups: &[RouterGroup], system_component_ports: &[u16]) -> Vec<String> {
    let mut conflicts = Vec::new();

    for group in groups {
        let ranges = match group.port_ranges() {
            Ok(ranges) => ranges,
            Err(e) => {
                warn!(router_group = %group.name, error = %e, "skipping router group with invalid reservable ports");
                continue;
            }
        };

        for range in ranges {
            let overlapping: Vec<String> = system_component_ports
                .iter()
                .filter(|port| range.contains(**port))
                .map(u16::to_string)
                .collect();

            if !overlapping.is_empty() {
                conflicts.push(format!(
                    "The reserved ports for router group '{}' contains the following reserved system component port(s): '{}'. Please update your router group accordingly.",
                    group.name,
                    overlapping.join(", ")
                ));
            }
        }
    }

    conflicts
}
