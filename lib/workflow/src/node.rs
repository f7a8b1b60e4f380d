//! Workflow node types.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use switchyard_core::ParseIdError;
use ulid::Ulid;

use crate::port::Port;

/// Unique identifier for a node within a workflow document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Ulid);

impl NodeId {
    /// Creates a new random node ID.
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

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node_{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ulid_str = s.strip_prefix("node_").unwrap_or(s);
        Ulid::from_str(ulid_str).map(Self).map_err(|e| ParseIdError {
            id_type: "NodeId",
            reason: e.to_string(),
        })
    }
}

impl From<Ulid> for NodeId {
    fn from(ulid: Ulid) -> Self {
        Self(ulid)
    }
}

/// The category of a workflow node.
///
/// The kind determines the node's role in an execution: triggers start
/// executions and never run as steps, everything else runs when its
/// inputs are ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Entry point that starts an execution in response to an event.
    Trigger,
    /// A unit of work such as a transform or an HTTP call.
    Action,
    /// An AI agent invocation.
    AiAgent,
    /// A call into an external third-party system.
    ExternalAction,
    /// Control-flow such as branching or merging.
    Flow,
    /// A step that waits on a human decision.
    HumanInLoop,
    /// A callable tool exposed to agents.
    Tool,
    /// A memory read or write step.
    Memory,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Trigger => "trigger",
            Self::Action => "action",
            Self::AiAgent => "ai_agent",
            Self::ExternalAction => "external_action",
            Self::Flow => "flow",
            Self::HumanInLoop => "human_in_loop",
            Self::Tool => "tool",
            Self::Memory => "memory",
        };
        write!(f, "{name}")
    }
}

/// A single node in a workflow document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier of this node within its workflow.
    pub id: NodeId,
    /// Human-readable name.
    pub name: String,
    /// The category of this node.
    pub kind: NodeKind,
    /// The concrete behavior within the category, e.g. `webhook` for a
    /// trigger or `transform` for an action.
    pub subtype: Option<String>,
    /// Configuration parameters, validated against the node's spec.
    #[serde(default)]
    pub configuration: HashMap<String, JsonValue>,
    /// Input ports.
    #[serde(default)]
    pub inputs: Vec<Port>,
    /// Output ports.
    #[serde(default)]
    pub outputs: Vec<Port>,
}

impl Node {
    /// Creates a new node with a fresh ID and no ports or configuration.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: NodeId::new(),
            name: name.into(),
            kind,
            subtype: None,
            configuration: HashMap::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Sets the node subtype.
    #[must_use]
    pub fn with_subtype(mut self, subtype: impl Into<String>) -> Self {
        self.subtype = Some(subtype.into());
        self
    }

    /// Sets a configuration parameter.
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.configuration.insert(key.into(), value);
        self
    }

    /// Adds an input port.
    #[must_use]
    pub fn with_input(mut self, port: Port) -> Self {
        self.inputs.push(port);
        self
    }

    /// Adds an output port.
    #[must_use]
    pub fn with_output(mut self, port: Port) -> Self {
        self.outputs.push(port);
        self
    }

    /// Looks up an input port by name.
    #[must_use]
    pub fn input_port(&self, id: &str) -> Option<&Port> {
        self.inputs.iter().find(|p| p.id == id)
    }

    /// Looks up an output port by name.
    #[must_use]
    pub fn output_port(&self, id: &str) -> Option<&Port> {
        self.outputs.iter().find(|p| p.id == id)
    }

    /// Returns true if this node is a trigger.
    #[must_use]
    pub fn is_trigger(&self) -> bool {
        self.kind == NodeKind::Trigger
    }

    /// Returns the subtype as a string slice, if set.
    #[must_use]
    pub fn subtype(&self) -> Option<&str> {
        self.subtype.as_deref()
    }
}
