//! # tcp-routing-api
//!
//! Wire model shared with the routing registry.
//!
//! ## Contents
//!
//! - [`ModificationTag`]: causality token stamped by the registry on every write
//! - [`TcpRouteMapping`]: one external port (plus optional SNI hostname) bound to
//!   one backend address:port
//! - [`TcpEvent`]: a single streamed change, an [`EventAction`] plus the mapping
//! - [`RouterGroup`]: a named set of reservable external ports
//!
//! The registry owns tag assignment. Consumers only ever compare tags, they
//! never mint them.

mod error;
mod router_group;
mod types;

pub use error::ModelError;
pub use router_group::{parse_reservable_ports, PortRange, RouterGroup};
pub use types::*;
