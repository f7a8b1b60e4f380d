//! Error types for the engine crate.

use std::fmt;

use switchyard_workflow::{ConnectionId, GraphError, NodeId, NodeKind};

/// Failure that prevents an execution plan from being built or started.
///
/// These are planning-time failures: nothing has run yet when one is
/// returned. Failures inside individual nodes are recorded on the
/// execution instead.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// The workflow's graph model could not be built or ordered.
    Graph(GraphError),
    /// No runner is registered for a reachable node.
    NoRunner {
        node_id: NodeId,
        kind: NodeKind,
        subtype: Option<String>,
    },
    /// A conversion snippet on a reachable connection failed to compile.
    InvalidConversion {
        connection_id: ConnectionId,
        message: String,
    },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Graph(e) => write!(f, "{e}"),
            Self::NoRunner {
                node_id,
                kind,
                subtype,
            } => match subtype {
                Some(subtype) => {
                    write!(f, "no runner for node {node_id} ({kind}/{subtype})")
                }
                None => write!(f, "no runner for node {node_id} ({kind})"),
            },
            Self::InvalidConversion {
                connection_id,
                message,
            } => write!(f, "connection {connection_id}: {message}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Graph(e) => Some(e),
            _ => None,
        }
    }
}

impl From<GraphError> for EngineError {
    fn from(e: GraphError) -> Self {
        Self::Graph(e)
    }
}
