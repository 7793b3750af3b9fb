//! Routing table to load-balancer config projection.
//!
//! Invalid routing data is skipped and logged at the smallest granularity
//! possible: a bad frontend drops that frontend, a bad backend drops only
//! that backend. Rendering never fails as a whole.
//!
//! Output is fully ordered (ports, then hostnames, then backends by address
//! and port) so identical tables always render identical configs.

use std::collections::BTreeMap;
use std::fmt;

use tracing::error;

use crate::routing_table::{BackendServerKey, RoutingKey, RoutingTable};

/// Maximum length of a single DNS label.
const MAX_LABEL_LEN: usize = 63;

/// Maximum hostname length, not counting dots.
const MAX_HOSTNAME_LEN: usize = 255;

/// Ordered backends of one frontend hostname.
pub type HaproxyBackend = Vec<BackendServerKey>;

/// Backends per SNI hostname on one port. The empty hostname is the default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HaproxyFrontend {
    backends: BTreeMap<String, HaproxyBackend>,
}

impl HaproxyFrontend {
    /// Returns true if any hostname other than the default is routed.
    pub fn contains_sni_routes(&self) -> bool {
        self.backends.keys().any(|hostname| !hostname.is_empty())
    }

    pub fn get(&self, sni_hostname: &str) -> Option<&HaproxyBackend> {
        self.backends.get(sni_hostname)
    }

    /// Hostnames in ascending order with their backends.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &HaproxyBackend)> {
        self.backends.iter().map(|(h, b)| (h.as_str(), b))
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

/// Rendered load-balancer configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HaproxyConfig {
    frontends: BTreeMap<u16, HaproxyFrontend>,
}

impl HaproxyConfig {
    /// Render a routing table.
    pub fn from_routing_table(table: &RoutingTable) -> Self {
        let mut frontends: BTreeMap<u16, HaproxyFrontend> = BTreeMap::new();

        for (key, entry) in table.entries() {
            if key.port == 0 {
                log_invalid("frontend_configuration.port", key, &key.port);
                continue;
            }

            if !key.sni_hostname.is_empty() && !is_valid_dns_name(&key.sni_hostname) {
                log_invalid("frontend_configuration.sni_hostname", key, &key.sni_hostname);
                continue;
            }

            let mut backends: HaproxyBackend = Vec::with_capacity(entry.backends.len());
            for backend in entry.backends.keys() {
                if backend.port == 0 {
                    log_invalid("backend_configuration.port", key, &backend.port);
                    continue;
                }

                if backend.address.is_empty() || !is_valid_dns_name(&backend.address) {
                    log_invalid("backend_configuration.address", key, &backend.address);
                    continue;
                }

                backends.push(backend.clone());
            }

            if backends.is_empty() {
                log_invalid("backend_configuration.servers", key, &"[]");
                continue;
            }

            backends.sort_by(|a, b| a.address.cmp(&b.address).then(a.port.cmp(&b.port)));

            frontends
                .entry(key.port)
                .or_default()
                .backends
                .insert(key.sni_hostname.clone(), backends);
        }

        Self { frontends }
    }

    pub fn get(&self, port: u16) -> Option<&HaproxyFrontend> {
        self.frontends.get(&port)
    }

    /// Ports in ascending order with their frontends.
    pub fn iter(&self) -> impl Iterator<Item = (u16, &HaproxyFrontend)> {
        self.frontends.iter().map(|(p, f)| (*p, f))
    }

    pub fn len(&self) -> usize {
        self.frontends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frontends.is_empty()
    }
}

fn log_invalid(field: &str, key: &RoutingKey, value: &dyn fmt::Display) {
    error!(
        field,
        port = key.port,
        sni_hostname = %key.sni_hostname,
        value = %value,
        "skipping invalid routing table entry"
    );
}

/// Check DNS hostname syntax.
///
/// Labels start with a letter, digit or underscore, continue with those or
/// `-`, and are at most 63 characters. One trailing `.` is allowed. The name
/// may not exceed 255 characters once dots are removed.
pub fn is_valid_dns_name(hostname: &str) -> bool {
    if hostname.chars().filter(|c| *c != '.').count() > MAX_HOSTNAME_LEN {
        return false;
    }

    let name = hostname.strip_suffix('.').unwrap_or(hostname);
    if name.is_empty() {
        return false;
    }

    name.split('.').all(is_valid_label)
}

fn is_valid_label(label: &str) -> bool {
    let mut chars = label.chars();
    let Some(first) = chars.next() else {
        return false;
    };

    label.len() <= MAX_LABEL_LEN
        && (first.is_ascii_alphanumeric() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
