//! TCP router control plane.
//!
//! Keeps an HAProxy instance's TCP frontends in line with the routing
//! registry:
//! - Streams route change events and applies them to an in-memory table
//! - Periodically reconciles the table against the registry's full state
//! - Evicts backends whose TTL has lapsed
//! - Renders the table to HAProxy config and reloads on change
//! - Checks router group ports against reserved system ports at startup

pub mod auth;
pub mod config;
pub mod configurer;
pub mod error;
pub mod haproxy;
pub mod port_checker;
pub mod registry;
pub mod routing_table;
pub mod syncer;
pub mod updater;
pub mod watcher;

pub use auth::{NoopTokenFetcher, OAuthTokenFetcher, TokenFetcher};
pub use config::Config;
pub use configurer::Configurer;
pub use error::{RegistryError, UpdaterError};
pub use haproxy::{HaproxyConfig, HaproxyConfigurer};
pub use port_checker::PortChecker;
pub use registry::{RouteRegistry, RoutingApiClient, TcpEventStream};
pub use routing_table::{
    BackendServerDetails, BackendServerInfo, BackendServerKey, RoutingKey, RoutingTable,
    RoutingTableEntry,
};
pub use updater::Updater;
pub use watcher::Watcher;
