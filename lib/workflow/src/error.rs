//! Error types for the workflow crate.

use std::fmt;

use crate::node::{NodeId, NodeKind};

/// Errors raised while building or traversing the graph model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// A connection references a node that is not in the workflow.
    UnknownNode { node_id: NodeId },
    /// The workflow contains at least one cycle, so no topological order
    /// exists. A partial order is never produced.
    CycleDetected,
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownNode { node_id } => {
                write!(f, "connection references unknown node {node_id}")
            }
            Self::CycleDetected => write!(f, "workflow graph contains a cycle"),
        }
    }
}

impl std::error::Error for GraphError {}

/// Error returned when no spec is registered for a node's kind and subtype.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecNotFound {
    /// The node kind that was looked up.
    pub kind: NodeKind,
    /// The subtype that was looked up, if any.
    pub subtype: Option<String>,
}

impl fmt::Display for SpecNotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.subtype {
            Some(subtype) => write!(f, "no spec registered for {}/{subtype}", self.kind),
            None => write!(f, "no spec registered for {}", self.kind),
        }
    }
}

impl std::error::Error for SpecNotFound {}
