//! Routing table and write-conflict rules.
//!
//! The routing table maps a frontend (external port plus optional SNI
//! hostname) to the set of backends serving it. Every backend carries the
//! registry's modification tag and a locally stamped update time.
//!
//! Rules:
//! - A key is present only while it has at least one backend
//! - Upserts to a known backend apply only when the incoming tag succeeds
//!   the stored one; deletes apply when it equals or succeeds
//! - Mutations report whether the rendered configuration must be regenerated
//! - Only backend presence affects the rendered configuration

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use tcp_routing_api::{ModificationTag, TcpRouteMapping};
use tracing::debug;

/// Key for a frontend (port + optional SNI hostname).
///
/// An empty hostname is the plain TCP frontend for the port.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoutingKey {
    pub port: u16,
    pub sni_hostname: String,
}

impl RoutingKey {
    pub fn new(port: u16, sni_hostname: impl Into<String>) -> Self {
        Self {
            port,
            sni_hostname: sni_hostname.into(),
        }
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.sni_hostname.is_empty() {
            write!(f, "{}", self.port)
        } else {
            write!(f, "{}/{}", self.port, self.sni_hostname)
        }
    }
}

impl From<&TcpRouteMapping> for RoutingKey {
    fn from(mapping: &TcpRouteMapping) -> Self {
        Self {
            port: mapping.external_port,
            sni_hostname: mapping.sni_hostname.clone().unwrap_or_default(),
        }
    }
}

/// Identity of a backend instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BackendServerKey {
    pub address: String,
    pub port: u16,
}

impl BackendServerKey {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }
}

impl fmt::Display for BackendServerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Incoming backend write, as translated from a registry mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendServerInfo {
    pub address: String,
    pub port: u16,
    pub modification_tag: ModificationTag,
    /// Seconds; 0 means the table default applies.
    pub ttl: u32,
}

impl BackendServerInfo {
    pub fn new(address: impl Into<String>, port: u16, tag: ModificationTag, ttl: u32) -> Self {
        Self {
            address: address.into(),
            port,
            modification_tag: tag,
            ttl,
        }
    }

    pub fn key(&self) -> BackendServerKey {
        BackendServerKey::new(self.address.clone(), self.port)
    }

    fn split(&self, now: DateTime<Utc>) -> (BackendServerKey, BackendServerDetails) {
        (
            self.key(),
            BackendServerDetails {
                modification_tag: self.modification_tag.clone(),
                ttl: self.ttl,
                updated_time: now,
            },
        )
    }
}

impl From<&TcpRouteMapping> for BackendServerInfo {
    fn from(mapping: &TcpRouteMapping) -> Self {
        Self {
            address: mapping.host_ip.clone(),
            port: mapping.host_port,
            modification_tag: mapping.modification_tag.clone(),
            ttl: mapping.ttl.unwrap_or(0),
        }
    }
}

/// Translate a registry mapping into the table's key and backend write.
pub fn routing_entry_from_mapping(mapping: &TcpRouteMapping) -> (RoutingKey, BackendServerInfo) {
    (RoutingKey::from(mapping), BackendServerInfo::from(mapping))
}

/// Mutable attributes of a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendServerDetails {
    pub modification_tag: ModificationTag,
    pub ttl: u32,
    /// Stamped locally on every accepted write. Drives TTL expiry only.
    pub updated_time: DateTime<Utc>,
}

impl BackendServerDetails {
    fn update_succeeded_by(&self, other: &BackendServerDetails) -> bool {
        self.modification_tag.succeeded_by(&other.modification_tag)
    }

    fn delete_succeeded_by(&self, other: &BackendServerDetails) -> bool {
        self.modification_tag == other.modification_tag
            || self.modification_tag.succeeded_by(&other.modification_tag)
    }

    /// Whether replacing `self` with `other` changes the rendered config.
    ///
    /// Tag and TTL are not rendered, so an attribute update never does.
    // NOTE: revisit if per-backend attributes (e.g. connection limits) are
    // ever rendered.
    fn affects_config(&self, _other: &BackendServerDetails) -> bool {
        false
    }

    /// Returns true if the backend expired before `now`.
    pub fn expired_at(&self, default_ttl: u32, now: DateTime<Utc>) -> bool {
        let ttl = if self.ttl == 0 { default_ttl } else { self.ttl };
        let expiry_time = now - TimeDelta::seconds(i64::from(ttl));
        expiry_time > self.updated_time
    }
}

/// Backends serving one frontend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingTableEntry {
    pub backends: HashMap<BackendServerKey, BackendServerDetails>,
}

impl RoutingTableEntry {
    /// Build an entry from a list of backends, stamping them now.
    pub fn new(backends: impl IntoIterator<Item = BackendServerInfo>) -> Self {
        let now = Utc::now();
        Self {
            backends: backends.into_iter().map(|info| info.split(now)).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    fn prune_backends(&mut self, default_ttl: u32, now: DateTime<Utc>) {
        self.backends
            .retain(|_, details| !details.expired_at(default_ttl, now));
    }
}

/// In-memory routing table.
///
/// Not synchronized; the owner serializes access.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingTable {
    entries: HashMap<RoutingKey, RoutingTableEntry>,
}

impl RoutingTable {
    /// Create a new empty routing table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or refresh a backend under `key`.
    ///
    /// Returns true if the routing configuration must be regenerated.
    pub fn upsert_backend_server_key(&mut self, key: RoutingKey, info: BackendServerInfo) -> bool {
        let (backend_key, new_details) = info.split(Utc::now());

        let Some(entry) = self.entries.get_mut(&key) else {
            debug!(routing_key = %key, backend = %backend_key, "routing key not found, creating entry");
            let mut entry = RoutingTableEntry::default();
            entry.backends.insert(backend_key, new_details);
            self.entries.insert(key, entry);
            return true;
        };

        let Some(current) = entry.backends.get(&backend_key) else {
            debug!(routing_key = %key, backend = %backend_key, "adding backend to existing entry");
            entry.backends.insert(backend_key, new_details);
            return true;
        };

        if current.update_succeeded_by(&new_details) {
            debug!(
                routing_key = %key,
                backend = %backend_key,
                old_tag = %current.modification_tag,
                new_tag = %new_details.modification_tag,
                "applying change to table"
            );
            let reload = current.affects_config(&new_details);
            entry.backends.insert(backend_key, new_details);
            reload
        } else {
            debug!(
                routing_key = %key,
                backend = %backend_key,
                old_tag = %current.modification_tag,
                new_tag = %new_details.modification_tag,
                "skipping stale event"
            );
            false
        }
    }

    /// Remove a backend from `key`, dropping the key once it has no backends.
    ///
    /// Returns true if anything was removed.
    pub fn delete_backend_server_key(&mut self, key: &RoutingKey, info: BackendServerInfo) -> bool {
        let (backend_key, new_details) = info.split(Utc::now());

        let Some(entry) = self.entries.get_mut(key) else {
            debug!(routing_key = %key, backend = %backend_key, "delete for unknown routing key");
            return false;
        };

        match entry.backends.get(&backend_key) {
            Some(existing) if existing.delete_succeeded_by(&new_details) => {
                debug!(routing_key = %key, backend = %backend_key, "removing from table");
                entry.backends.remove(&backend_key);
                if entry.is_empty() {
                    self.entries.remove(key);
                }
                true
            }
            Some(existing) => {
                debug!(
                    routing_key = %key,
                    backend = %backend_key,
                    old_tag = %existing.modification_tag,
                    new_tag = %new_details.modification_tag,
                    "skipping stale event"
                );
                false
            }
            None => {
                debug!(routing_key = %key, backend = %backend_key, "delete for unknown backend");
                false
            }
        }
    }

    /// Replace the entry for `key` unconditionally.
    ///
    /// Returns false only if the new entry equals the existing one. An empty
    /// entry removes the key.
    pub fn set(&mut self, key: RoutingKey, entry: RoutingTableEntry) -> bool {
        if entry.is_empty() {
            return self.entries.remove(&key).is_some();
        }

        if self.entries.get(&key) == Some(&entry) {
            return false;
        }
        self.entries.insert(key, entry);
        true
    }

    /// Drop every backend whose TTL has elapsed, and any key left empty.
    pub fn prune_entries(&mut self, default_ttl: u32) {
        self.prune_entries_at(default_ttl, Utc::now());
    }

    /// Same as [`RoutingTable::prune_entries`] with an explicit clock reading.
    pub fn prune_entries_at(&mut self, default_ttl: u32, now: DateTime<Utc>) {
        self.entries.retain(|key, entry| {
            entry.prune_backends(default_ttl, now);
            if entry.is_empty() {
                debug!(routing_key = %key, "pruned expired routing key");
                false
            } else {
                true
            }
        });
    }

    /// Get the entry for `key`, or an empty entry if absent.
    pub fn get(&self, key: &RoutingKey) -> RoutingTableEntry {
        self.entries.get(key).cloned().unwrap_or_default()
    }

    /// Number of routing keys.
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of backends across all keys.
    pub fn backend_count(&self) -> usize {
        self.entries.values().map(|e| e.backends.len()).sum()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&RoutingKey, &RoutingTableEntry)> {
        self.entries.iter()
    }

    /// Replace all entries with those of `other`.
    pub fn replace_entries(&mut self, other: RoutingTable) {
        self.entries = other.entries;
    }
}
