//! Port system for workflow nodes.
//!
//! Ports are named connection points on nodes. Each port declares the data
//! type it accepts (input) or produces (output), whether it must be
//! connected, and how many connections may target or leave it.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// The conventional port name used when a connection does not name one.
pub const DEFAULT_PORT: &str = "main";

/// The data type carried by a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortDataType {
    /// Accepts any JSON value.
    #[default]
    Any,
    /// JSON string.
    String,
    /// JSON number.
    Number,
    /// JSON boolean.
    Boolean,
    /// JSON object.
    Object,
    /// JSON array.
    Array,
}

impl PortDataType {
    /// Returns true if the given JSON value is acceptable for this type.
    #[must_use]
    pub fn accepts(&self, value: &JsonValue) -> bool {
        match self {
            Self::Any => true,
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
        }
    }
}

impl fmt::Display for PortDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Any => "any",
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
        })
    }
}

/// A named input or output slot on a workflow node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    /// The name of this port.
    pub id: String,
    /// The data type this port carries.
    pub data_type: PortDataType,
    /// Whether this port must be connected (inputs only).
    pub required: bool,
    /// Maximum number of connections allowed on this port.
    /// `None` means unlimited.
    pub max_connections: Option<u32>,
}

impl Port {
    /// Creates a new required port.
    #[must_use]
    pub fn required(id: impl Into<String>, data_type: PortDataType) -> Self {
        Self {
            id: id.into(),
            data_type,
            required: true,
            max_connections: None,
        }
    }

    /// Creates a new optional port.
    #[must_use]
    pub fn optional(id: impl Into<String>, data_type: PortDataType) -> Self {
        Self {
            id: id.into(),
            data_type,
            required: false,
            max_connections: None,
        }
    }

    /// Creates the conventional default port, accepting any value.
    #[must_use]
    pub fn main() -> Self {
        Self::optional(DEFAULT_PORT, PortDataType::Any)
    }

    /// Limits the number of connections allowed on this port.
    #[must_use]
    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = Some(max);
        self
    }

    /// Limits this port to a single connection.
    #[must_use]
    pub fn single(self) -> Self {
        self.with_max_connections(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_accepts_everything() {
        let any = PortDataType::Any;
        assert!(any.accepts(&serde_json::json!("text")));
        assert!(any.accepts(&serde_json::json!(42)));
        assert!(any.accepts(&serde_json::json!({"a": 1})));
        assert!(any.accepts(&serde_json::json!(null)));
    }

    #[test]
    fn typed_ports_reject_mismatches() {
        assert!(PortDataType::String.accepts(&serde_json::json!("text")));
        assert!(!PortDataType::String.accepts(&serde_json::json!(42)));
        assert!(PortDataType::Object.accepts(&serde_json::json!({"a": 1})));
        assert!(!PortDataType::Object.accepts(&serde_json::json!([1, 2])));
    }

    #[test]
    fn port_builders() {
        let port = Port::required("data", PortDataType::Object).single();
        assert!(port.required);
        assert_eq!(port.max_connections, Some(1));

        let port = Port::main();
        assert_eq!(port.id, DEFAULT_PORT);
        assert!(!port.required);
        assert_eq!(port.max_connections, None);
    }

    #[test]
    fn port_serde_roundtrip() {
        let port = Port::optional("out", PortDataType::Array).with_max_connections(4);
        let json = serde_json::to_string(&port).expect("serialize");
        let parsed: Port = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(port, parsed);
    }
}
