//! Workflow execution engine for the switchyard execution core.
//!
//! The engine takes a validated workflow document and a triggering event,
//! schedules the reachable nodes in deterministic topological order, and
//! produces an `Execution` record of the run. Data moves between nodes
//! along connections, optionally reshaped by sandboxed conversion
//! snippets.

pub mod convert;
pub mod engine;
pub mod error;
pub mod execution;
pub mod runner;

pub use convert::{CompiledConversion, ConversionError, ConversionEvaluator};
pub use engine::ExecutionEngine;
pub use error::EngineError;
pub use execution::{Execution, ExecutionState, NodeExecution, NodeExecutionState};
pub use runner::{EchoRunner, NodeRunner, RunnerError, RunnerRegistry, TransformRunner};
