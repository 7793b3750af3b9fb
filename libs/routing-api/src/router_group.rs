//! Router groups and their reservable port ranges.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// A named set of external ports a router serves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterGroup {
    #[serde(default)]
    pub guid: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub group_type: String,
    /// Comma separated ports and ranges, e.g. `"1024-1033,2000"`.
    #[serde(default)]
    pub reservable_ports: String,
}

impl RouterGroup {
    pub fn new(name: impl Into<String>, reservable_ports: impl Into<String>) -> Self {
        Self {
            guid: String::new(),
            name: name.into(),
            group_type: "tcp".to_string(),
            reservable_ports: reservable_ports.into(),
        }
    }

    /// Parse `reservable_ports` into ranges.
    pub fn port_ranges(&self) -> Result<Vec<PortRange>, ModelError> {
        parse_reservable_ports(&self.reservable_ports)
    }
}

/// Inclusive port range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Result<Self, ModelError> {
        if start == 0 || start > end {
            return Err(ModelError::InvalidPortRange(format!("{start}-{end}")));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.start..=self.end).contains(&port)
    }

    fn overlaps(&self, other: &PortRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

impl FromStr for PortRange {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ModelError::InvalidPortRange(s.to_string());
        let parse_port = |p: &str| p.trim().parse::<u16>().map_err(|_| invalid());

        let (start, end) = match s.split_once('-') {
            Some((start, end)) => (parse_port(start)?, parse_port(end)?),
            None => {
                let port = parse_port(s)?;
                (port, port)
            }
        };
        PortRange::new(start, end).map_err(|_| invalid())
    }
}

/// Parse a reservable ports string. Ranges must not overlap.
pub fn parse_reservable_ports(ports: &str) -> Result<Vec<PortRange>, ModelError> {
    if ports.trim().is_empty() {
        return Err(ModelError::InvalidPortRange(ports.to_string()));
    }

    let mut ranges = ports
        .split(',')
        .map(|part| part.trim().parse::<PortRange>())
        .collect::<Result<Vec<_>, _>>()?;

    ranges.sort();
    for pair in ranges.windows(2) {
        if pair[0].overlaps(&pair[1]) {
            return Err(ModelError::InvalidPortRange(format!(
                "overlapping ranges {} and {}",
                pair[0], pair[1]
            )));
        }
    }

    Ok(ranges)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_ports_and_ranges() {
        let ranges = parse_reservable_ports("2000, 1024-1033").unwrap();
        assert_eq!(
            ranges,
            vec![PortRange::new(1024, 1033).unwrap(), PortRange::new(2000, 2000).unwrap()]
        );
        assert!(ranges[0].contains(1024));
        assert!(ranges[0].contains(1033));
        assert!(!ranges[0].contains(1034));
    }

    #[test]
    fn test_rejects_malformed_input() {
        for input in ["", "abc", "0", "10-5", "1-70000", "1024-", "100-200,150-250"] {
            assert!(
                parse_reservable_ports(input).is_err(),
                "expected {input:?} to be rejected"
            );
        }
    }

    #[test]
    fn test_router_group_json() {
        let group: RouterGroup = serde_json::from_str(
            r#"{"guid":"abc","name":"default-tcp","type":"tcp","reservable_ports":"1024-1033"}"#,
        )
        .unwrap();
        assert_eq!(group.name, "default-tcp");
        assert_eq!(group.group_type, "tcp");
        assert_eq!(group.port_ranges().unwrap().len(), 1);
    }
}
