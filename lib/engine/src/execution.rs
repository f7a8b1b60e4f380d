//! Execution records and state machines.
//!
//! An execution is the record of one run of a workflow: one
//! `NodeExecution` per node the engine considered, plus the overall
//! outcome. State transitions only move forward; a terminal state is
//! never left.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use switchyard_core::{ExecutionId, NodeExecutionId, WorkflowId};
use switchyard_workflow::NodeId;

/// Overall state of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    /// Created at admission but not yet picked up by the engine.
    Pending,
    /// The engine is still working through the plan.
    Running,
    /// Every scheduled node succeeded or was legitimately skipped.
    Succeeded,
    /// At least one node failed.
    Failed,
    /// The execution was cancelled before it finished.
    Cancelled,
}

impl ExecutionState {
    /// Returns true once the execution can no longer change state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

/// State of a single node within an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeExecutionState {
    /// Scheduled but not yet started.
    Pending,
    /// Currently running.
    Running,
    /// Finished successfully and produced an output map.
    Succeeded,
    /// Finished with an error.
    Failed,
    /// Never ran because an upstream node did not succeed.
    Skipped,
    /// Never finished because the execution was cancelled.
    Cancelled,
}

impl NodeExecutionState {
    /// Returns true once the node can no longer change state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    /// Returns true if downstream nodes must not run because of this
    /// node's outcome.
    #[must_use]
    pub fn blocks_downstream(&self) -> bool {
        matches!(self, Self::Failed | Self::Skipped | Self::Cancelled)
    }
}

/// The record of one node within an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeExecution {
    /// Unique identifier of this record.
    pub id: NodeExecutionId,
    /// The workflow node this record belongs to.
    pub node_id: NodeId,
    /// Current state.
    pub state: NodeExecutionState,
    /// The inputs delivered to the node, keyed by input port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<JsonValue>,
    /// The output map the node produced, keyed by output port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Map<String, JsonValue>>,
    /// The error message, if the node failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the node started running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the node reached a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl NodeExecution {
    /// Creates a pending record for a node.
    #[must_use]
    pub fn pending(node_id: NodeId) -> Self {
        Self {
            id: NodeExecutionId::new(),
            node_id,
            state: NodeExecutionState::Pending,
            inputs: None,
            output: None,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// Marks the node as running with the inputs it was given.
    pub fn start(&mut self, inputs: JsonValue) {
        self.state = NodeExecutionState::Running;
        self.inputs = Some(inputs);
        self.started_at = Some(Utc::now());
    }

    /// Marks the node as succeeded with its output map.
    pub fn succeed(&mut self, output: Map<String, JsonValue>) {
        self.state = NodeExecutionState::Succeeded;
        self.output = Some(output);
        self.finished_at = Some(Utc::now());
    }

    /// Marks the node as failed with an error message.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.state = NodeExecutionState::Failed;
        self.error = Some(error.into());
        self.finished_at = Some(Utc::now());
    }

    /// Marks the node as skipped because an upstream node did not
    /// succeed.
    pub fn skip(&mut self) {
        self.state = NodeExecutionState::Skipped;
        self.finished_at = Some(Utc::now());
    }

    /// Marks the node as cancelled.
    pub fn cancel(&mut self) {
        self.state = NodeExecutionState::Cancelled;
        self.finished_at = Some(Utc::now());
    }
}

/// The record of one run of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    /// Unique identifier of this execution.
    pub id: ExecutionId,
    /// The workflow that was executed.
    pub workflow_id: WorkflowId,
    /// Overall state.
    pub state: ExecutionState,
    /// The event payload the execution started from.
    pub payload: JsonValue,
    /// One record per node the engine considered, in scheduling order.
    pub node_executions: Vec<NodeExecution>,
    /// When the engine started working through the plan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the execution reached a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Execution {
    /// Creates a pending execution for a workflow.
    #[must_use]
    pub fn new(workflow_id: WorkflowId, payload: JsonValue) -> Self {
        Self {
            id: ExecutionId::new(),
            workflow_id,
            state: ExecutionState::Pending,
            payload,
            node_executions: Vec::new(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Marks the execution as running.
    pub fn start(&mut self) {
        self.state = ExecutionState::Running;
        self.started_at = Some(Utc::now());
    }

    /// Finishes the execution in the given terminal state.
    pub fn finish(&mut self, state: ExecutionState) {
        debug_assert!(state.is_terminal());
        self.state = state;
        self.finished_at = Some(Utc::now());
    }

    /// Looks up the record for a node.
    #[must_use]
    pub fn node_execution(&self, node_id: NodeId) -> Option<&NodeExecution> {
        self.node_executions.iter().find(|n| n.node_id == node_id)
    }

    /// Returns true if any node failed.
    #[must_use]
    pub fn any_failed(&self) -> bool {
        self.node_executions
            .iter()
            .any(|n| n.state == NodeExecutionState::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn node_lifecycle_succeed() {
        let mut record = NodeExecution::pending(NodeId::new());
        assert!(!record.state.is_terminal());

        record.start(json!({"main": 1}));
        assert_eq!(record.state, NodeExecutionState::Running);
        assert!(record.started_at.is_some());

        let mut output = Map::new();
        output.insert("main".into(), json!(2));
        record.succeed(output);
        assert!(record.state.is_terminal());
        assert!(!record.state.blocks_downstream());
        assert!(record.finished_at.is_some());
    }

    #[test]
    fn failed_and_skipped_block_downstream() {
        assert!(NodeExecutionState::Failed.blocks_downstream());
        assert!(NodeExecutionState::Skipped.blocks_downstream());
        assert!(NodeExecutionState::Cancelled.blocks_downstream());
        assert!(!NodeExecutionState::Succeeded.blocks_downstream());
    }

    #[test]
    fn execution_begins_pending_then_runs() {
        let mut execution = Execution::new(WorkflowId::new(), json!({}));
        assert_eq!(execution.state, ExecutionState::Pending);
        assert!(!execution.state.is_terminal());
        assert!(execution.started_at.is_none());

        execution.start();
        assert_eq!(execution.state, ExecutionState::Running);
        assert!(!execution.state.is_terminal());
        assert!(execution.started_at.is_some());
    }

    #[test]
    fn execution_finish_records_outcome() {
        let mut execution = Execution::new(WorkflowId::new(), json!({}));
        execution.start();
        assert!(!execution.state.is_terminal());
        execution.finish(ExecutionState::Succeeded);
        assert_eq!(execution.state, ExecutionState::Succeeded);
        assert!(execution.finished_at.is_some());
    }

    #[test]
    fn any_failed_reflects_node_outcomes() {
        let mut execution = Execution::new(WorkflowId::new(), json!({}));
        execution.start();
        let mut good = NodeExecution::pending(NodeId::new());
        good.start(json!({}));
        good.succeed(Map::new());
        let mut bad = NodeExecution::pending(NodeId::new());
        bad.start(json!({}));
        bad.fail("boom");
        execution.node_executions.push(good);
        assert!(!execution.any_failed());
        execution.node_executions.push(bad);
        assert!(execution.any_failed());
    }
}
