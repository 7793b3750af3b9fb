//! HAProxy rendering and configuration.
//!
//! ```text
//! RoutingTable -> HaproxyConfig (validated, ordered) -> marshal() -> haproxy.cfg -> reload
//! ```

mod config;
mod configurer;
mod marshal;

pub use config::{is_valid_dns_name, HaproxyBackend, HaproxyConfig, HaproxyFrontend};
pub use configurer::{HaproxyConfigurer, ScriptRunner};
pub use marshal::marshal;
