//! Connections between node ports.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use switchyard_core::ParseIdError;
use ulid::Ulid;

use crate::node::NodeId;
use crate::port::DEFAULT_PORT;

/// Unique identifier for a connection within a workflow document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Ulid);

impl ConnectionId {
    /// Creates a new random connection ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Returns the underlying ULID.
    #[must_use]
    pub const fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn_{}", self.0)
    }
}

impl FromStr for ConnectionId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ulid_str = s.strip_prefix("conn_").unwrap_or(s);
        Ulid::from_str(ulid_str).map(Self).map_err(|e| ParseIdError {
            id_type: "ConnectionId",
            reason: e.to_string(),
        })
    }
}

/// A directed edge from one node's output port to another node's input port.
///
/// An optional conversion snippet reshapes the value as it crosses the
/// connection. Without one, the value is routed unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    /// Unique identifier of this connection.
    pub id: ConnectionId,
    /// The node the value leaves from.
    pub from_node: NodeId,
    /// The output port on the source node.
    pub from_port: String,
    /// The node the value arrives at.
    pub to_node: NodeId,
    /// The input port on the target node.
    pub to_port: String,
    /// Optional conversion snippet applied to the value in transit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversion: Option<String>,
}

impl Connection {
    /// Creates a connection between two named ports.
    #[must_use]
    pub fn new(
        from_node: NodeId,
        from_port: impl Into<String>,
        to_node: NodeId,
        to_port: impl Into<String>,
    ) -> Self {
        Self {
            id: ConnectionId::new(),
            from_node,
            from_port: from_port.into(),
            to_node,
            to_port: to_port.into(),
            conversion: None,
        }
    }

    /// Creates a connection between the default ports of two nodes.
    #[must_use]
    pub fn between(from_node: NodeId, to_node: NodeId) -> Self {
        Self::new(from_node, DEFAULT_PORT, to_node, DEFAULT_PORT)
    }

    /// Attaches a conversion snippet to this connection.
    #[must_use]
    pub fn with_conversion(mut self, snippet: impl Into<String>) -> Self {
        self.conversion = Some(snippet.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_id_display_and_parse() {
        let id = ConnectionId::new();
        let display = id.to_string();
        assert!(display.starts_with("conn_"));
        let parsed: ConnectionId = display.parse().expect("should parse");
        assert_eq!(id, parsed);
    }

    #[test]
    fn between_uses_default_ports() {
        let a = NodeId::new();
        let b = NodeId::new();
        let conn = Connection::between(a, b);
        assert_eq!(conn.from_port, DEFAULT_PORT);
        assert_eq!(conn.to_port, DEFAULT_PORT);
        assert!(conn.conversion.is_none());
    }

    #[test]
    fn conversion_snippet_roundtrips() {
        let conn = Connection::between(NodeId::new(), NodeId::new())
            .with_conversion("fn convert(input) { input }");
        let json = serde_json::to_string(&conn).expect("serialize");
        let parsed: Connection = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(conn, parsed);
    }
}
