//! Load-balancer configurer interface.

use anyhow::Result;
use async_trait::async_trait;

use crate::routing_table::RoutingTable;

/// Renders a routing table and applies it to the load balancer.
///
/// Called with the updater's lock held, so implementations must not call
/// back into the updater.
#[async_trait]
pub trait Configurer: Send + Sync {
    async fn configure(&self, table: &RoutingTable) -> Result<()>;
}
