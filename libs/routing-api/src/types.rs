//! Registry payload definitions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

// =============================================================================
// Modification Tag
// =============================================================================

/// Causality token assigned by the registry.
///
/// `guid` identifies a writer lineage and `index` increases monotonically
/// within it. Tags are never compared across lineages by index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModificationTag {
    #[serde(default)]
    pub guid: String,
    #[serde(default)]
    pub index: u64,
}

impl ModificationTag {
    pub fn new(guid: impl Into<String>, index: u64) -> Self {
        Self {
            guid: guid.into(),
            index,
        }
    }

    /// Returns true if `other` is a newer write than `self`.
    ///
    /// Same lineage: only a strictly greater index succeeds. A different
    /// lineage always succeeds (last writer wins across lineages). Equal tags
    /// are duplicates and do not succeed.
    pub fn succeeded_by(&self, other: &ModificationTag) -> bool {
        self.guid != other.guid || other.index > self.index
    }
}

impl fmt::Display for ModificationTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.guid, self.index)
    }
}

// =============================================================================
// TCP Route Mapping
// =============================================================================

/// A single TCP route mapping as served by the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpRouteMapping {
    #[serde(default)]
    pub router_group_guid: String,
    /// External (frontend) port.
    #[serde(rename = "port")]
    pub external_port: u16,
    #[serde(
        rename = "backend_sni_hostname",
        alias = "sni_hostname",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sni_hostname: Option<String>,
    #[serde(rename = "backend_ip")]
    pub host_ip: String,
    #[serde(rename = "backend_port")]
    pub host_port: u16,
    /// Seconds; `None` means the consumer's default applies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u32>,
    #[serde(default)]
    pub modification_tag: ModificationTag,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub isolation_segment: String,
}

impl TcpRouteMapping {
    pub fn new(
        router_group_guid: impl Into<String>,
        external_port: u16,
        host_ip: impl Into<String>,
        host_port: u16,
        ttl: u32,
    ) -> Self {
        Self {
            router_group_guid: router_group_guid.into(),
            external_port,
            sni_hostname: None,
            host_ip: host_ip.into(),
            host_port,
            ttl: Some(ttl),
            modification_tag: ModificationTag::default(),
            isolation_segment: String::new(),
        }
    }

    pub fn with_sni_hostname(mut self, sni_hostname: impl Into<String>) -> Self {
        self.sni_hostname = Some(sni_hostname.into());
        self
    }

    pub fn with_modification_tag(mut self, tag: ModificationTag) -> Self {
        self.modification_tag = tag;
        self
    }
}

// =============================================================================
// Events
// =============================================================================

/// Recognised event actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventAction {
    Upsert,
    Delete,
}

impl EventAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventAction::Upsert => "Upsert",
            EventAction::Delete => "Delete",
        }
    }
}

impl fmt::Display for EventAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventAction {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Upsert" => Ok(EventAction::Upsert),
            "Delete" => Ok(EventAction::Delete),
            other => Err(ModelError::UnknownEventAction(other.to_string())),
        }
    }
}

/// A streamed change notification.
///
/// The action is kept verbatim so that an unrecognised value can travel to
/// the consumer, which decides how to report it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpEvent {
    pub action: String,
    pub mapping: TcpRouteMapping,
}

impl TcpEvent {
    pub fn new(action: EventAction, mapping: TcpRouteMapping) -> Self {
        Self {
            action: action.as_str().to_string(),
            mapping,
        }
    }

    /// Decode an event from its action name and JSON mapping body.
    pub fn from_parts(action: &str, data: &str) -> Result<Self, ModelError> {
        let mapping: TcpRouteMapping = serde_json::from_str(data)?;
        Ok(Self {
            action: action.to_string(),
            mapping,
        })
    }

    pub fn parsed_action(&self) -> Result<EventAction, ModelError> {
        self.action.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_same_guid_higher_index_succeeds() {
        let stored = ModificationTag::new("guid1", 5);

        assert!(stored.succeeded_by(&ModificationTag::new("guid1", 6)));
        assert!(!stored.succeeded_by(&ModificationTag::new("guid1", 5)));
        assert!(!stored.succeeded_by(&ModificationTag::new("guid1", 4)));
    }

    #[test]
    fn test_different_guid_always_succeeds() {
        let stored = ModificationTag::new("guid1", 5);
        assert!(stored.succeeded_by(&ModificationTag::new("guid5", 0)));
    }

    #[test]
    fn test_mapping_deserializes_registry_json() {
        let json = r#"{"router_group_guid": "rguid1", "port":52000, "backend_port":60000,"backend_ip":"1.1.1.1","modification_tag":{"guid":"my-guid","index":5}}"#;
        let mapping: TcpRouteMapping = serde_json::from_str(json).unwrap();

        assert_eq!(mapping.router_group_guid, "rguid1");
        assert_eq!(mapping.external_port, 52000);
        assert_eq!(mapping.host_ip, "1.1.1.1");
        assert_eq!(mapping.host_port, 60000);
        assert_eq!(mapping.ttl, None);
        assert_eq!(mapping.sni_hostname, None);
        assert_eq!(mapping.modification_tag, ModificationTag::new("my-guid", 5));
    }

    #[test]
    fn test_mapping_accepts_sni_hostname_aliases() {
        let json = r#"{"port":443,"backend_ip":"10.0.0.1","backend_port":8443,"sni_hostname":"app.example.com","ttl":60}"#;
        let mapping: TcpRouteMapping = serde_json::from_str(json).unwrap();
        assert_eq!(mapping.sni_hostname.as_deref(), Some("app.example.com"));
        assert_eq!(mapping.ttl, Some(60));

        let json = r#"{"port":443,"backend_ip":"10.0.0.1","backend_port":8443,"backend_sni_hostname":"app.example.com"}"#;
        let mapping: TcpRouteMapping = serde_json::from_str(json).unwrap();
        assert_eq!(mapping.sni_hostname.as_deref(), Some("app.example.com"));
    }

    #[test]
    fn test_event_action_parsing() {
        assert_eq!("Upsert".parse::<EventAction>(), Ok(EventAction::Upsert));
        assert_eq!("Delete".parse::<EventAction>(), Ok(EventAction::Delete));
        assert_eq!(
            "Frobnicate".parse::<EventAction>(),
            Err(ModelError::UnknownEventAction("Frobnicate".to_string()))
        );
    }

    #[test]
    fn test_event_from_parts_rejects_invalid_json() {
        let err = TcpEvent::from_parts("Upsert", "This isn't valid json").unwrap_err();
        assert!(matches!(err, ModelError::InvalidPayload(_)));
    }

    proptest! {
        #[test]
        fn prop_tag_never_succeeds_itself(guid in "[a-z0-9-]{0,12}", index in any::<u64>()) {
            let tag = ModificationTag::new(guid, index);
            prop_assert!(!tag.succeeded_by(&tag.clone()));
        }

        #[test]
        fn prop_same_lineage_is_ordered_by_index(guid in "[a-z0-9-]{1,12}", a in any::<u64>(), b in any::<u64>()) {
            let first = ModificationTag::new(guid.clone(), a);
            let second = ModificationTag::new(guid, b);
            prop_assert_eq!(first.succeeded_by(&second), b > a);
        }
    }
}
