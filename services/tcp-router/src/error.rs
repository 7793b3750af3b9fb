//! Error types for the router control plane.

use tcp_routing_api::ModelError;
use thiserror::Error;

/// Errors returned by [`crate::updater::Updater::handle_event`].
#[derive(Debug, Error)]
pub enum UpdaterError {
    /// The event carried an action other than `Upsert` or `Delete`.
    #[error("unknown-event-action:{0}")]
    UnknownEventAction(String),

    /// The table changed but the load balancer could not be configured.
    #[error("failed to configure load balancer: {0:#}")]
    Configure(#[source] anyhow::Error),
}

/// Errors talking to the routing registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The registry rejected the bearer token.
    #[error("unauthorized")]
    Unauthorized,

    /// Any other non-success response.
    #[error("routing api request failed (status={status}): {body}")]
    Status { status: u16, body: String },

    #[error("routing api request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid routing api payload: {0}")]
    Decode(#[from] ModelError),
}

impl RegistryError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, RegistryError::Unauthorized)
    }
}
