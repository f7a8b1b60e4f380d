//! Workflow document model for the switchyard execution core.
//!
//! A workflow is a directed acyclic graph of typed nodes joined by port
//! connections. This crate owns the document model, the graph model the
//! engine schedules against, the node spec registry, and the batch
//! validator.

pub mod connection;
pub mod definition;
pub mod error;
pub mod graph;
pub mod node;
pub mod port;
pub mod registry;
pub mod validator;

pub use connection::{Connection, ConnectionId};
pub use definition::{Workflow, WorkflowMetadata};
pub use error::{GraphError, SpecNotFound};
pub use graph::{EdgeData, GraphModel};
pub use node::{Node, NodeId, NodeKind};
pub use port::{DEFAULT_PORT, Port, PortDataType};
pub use registry::{ConfigViolation, NodeSpec, ParameterSpec, ParameterType, SpecRegistry};
pub use validator::{ValidationReport, Violation, validate_workflow};
