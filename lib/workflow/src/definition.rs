//! Workflow document definition.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use switchyard_core::WorkflowId;

use crate::connection::Connection;
use crate::graph::GraphModel;
use crate::node::{Node, NodeId};

/// Descriptive metadata attached to a workflow document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    /// Human-readable workflow name.
    pub name: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Monotonically increasing version number.
    pub version: u32,
    /// Free-form tags for discovery.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// When the document was created.
    pub created_at: DateTime<Utc>,
    /// When the document was last modified.
    pub updated_at: DateTime<Utc>,
}

impl WorkflowMetadata {
    /// Creates metadata for a new version-1 workflow.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            description: None,
            version: 1,
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Adds a tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Bumps the version and touches the updated timestamp.
    pub fn bump_version(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }
}

/// A complete workflow document: nodes, connections, and the designated
/// trigger entry points.
///
/// Node declaration order is significant: it breaks ties when the graph
/// model computes a topological order, so two loads of the same document
/// always schedule nodes identically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique identifier of this workflow.
    pub id: WorkflowId,
    /// Descriptive metadata.
    pub metadata: WorkflowMetadata,
    /// All nodes, in declaration order.
    pub nodes: Vec<Node>,
    /// All connections between node ports.
    #[serde(default)]
    pub connections: Vec<Connection>,
    /// Node IDs designated as trigger entry points.
    #[serde(default)]
    pub triggers: Vec<NodeId>,
}

impl Workflow {
    /// Creates an empty workflow with a fresh ID.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: WorkflowId::new(),
            metadata: WorkflowMetadata::new(name),
            nodes: Vec::new(),
            connections: Vec::new(),
            triggers: Vec::new(),
        }
    }

    /// Adds a node and returns its ID. Trigger nodes are also registered
    /// as entry points.
    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = node.id;
        if node.is_trigger() {
            self.triggers.push(id);
        }
        self.nodes.push(node);
        id
    }

    /// Adds a connection between two existing nodes.
    pub fn connect(&mut self, connection: Connection) {
        self.connections.push(connection);
    }

    /// Looks up a node by ID.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Returns the declaration position of a node, if present.
    #[must_use]
    pub fn node_position(&self, id: NodeId) -> Option<usize> {
        self.nodes.iter().position(|n| n.id == id)
    }

    /// Returns a map from node ID to node for fast repeated lookups.
    #[must_use]
    pub fn node_map(&self) -> HashMap<NodeId, &Node> {
        self.nodes.iter().map(|n| (n.id, n)).collect()
    }

    /// Returns the trigger nodes in declaration order.
    pub fn trigger_nodes(&self) -> impl Iterator<Item = &Node> {
        self.triggers.iter().filter_map(|id| self.node(*id))
    }

    /// Builds the graph model for this workflow.
    pub fn graph(&self) -> Result<GraphModel, crate::error::GraphError> {
        GraphModel::build(self)
    }
}
