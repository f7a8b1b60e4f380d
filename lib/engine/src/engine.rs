//! The execution engine.
//!
//! The engine turns a workflow document and a triggering event into an
//! `Execution` record. Planning happens up front: the graph is built and
//! ordered, conversion snippets are compiled, and runners are resolved
//! before any node runs, so a malformed plan fails fast without side
//! effects.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use serde_json::{Map, Value as JsonValue};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use switchyard_workflow::{ConnectionId, GraphModel, Node, NodeId, Workflow};

use crate::convert::{CompiledConversion, ConversionEvaluator};
use crate::error::EngineError;
use crate::execution::{Execution, ExecutionState, NodeExecution};
use crate::runner::{NodeRunner, RunnerRegistry};

/// Executes workflows against a runner registry.
pub struct ExecutionEngine {
    runners: RunnerRegistry,
    evaluator: Arc<ConversionEvaluator>,
}

impl ExecutionEngine {
    /// Creates an engine with an explicit runner registry and evaluator.
    #[must_use]
    pub fn new(runners: RunnerRegistry, evaluator: Arc<ConversionEvaluator>) -> Self {
        Self { runners, evaluator }
    }

    /// Creates an engine with the built-in runners.
    #[must_use]
    pub fn with_defaults() -> Self {
        let evaluator = Arc::new(ConversionEvaluator::new());
        let runners = RunnerRegistry::with_defaults(evaluator.clone());
        Self { runners, evaluator }
    }

    /// Executes a workflow.
    ///
    /// `fired` names the trigger nodes the event activated; when empty,
    /// the graph's own entry points are used. Only nodes reachable from
    /// the fired set are scheduled. Trigger nodes never run as steps:
    /// their output is the event payload under the default port.
    ///
    /// Cancelling the token stops the execution at the next node
    /// boundary, or interrupts the node currently running.
    pub async fn execute(
        &self,
        workflow: &Workflow,
        fired: &[NodeId],
        payload: JsonValue,
        cancel: CancellationToken,
    ) -> Result<Execution, EngineError> {
        let plan = self.plan(workflow, fired)?;
        let mut execution = Execution::new(workflow.id, payload.clone());
        info!(
            execution_id = %execution.id,
            workflow_id = %workflow.id,
            nodes = plan.reachable.len(),
            "starting execution"
        );
        execution.start();

        // Output map of each finished node, keyed by output port.
        let mut outputs: HashMap<NodeId, Map<String, JsonValue>> = HashMap::new();
        let mut cancelled = false;

        for node_id in &plan.order {
            if !plan.reachable.contains(node_id) {
                continue;
            }
            // Planning guarantees every reachable node is in the document.
            let Some(node) = workflow.node(*node_id) else {
                continue;
            };
            let mut record = NodeExecution::pending(*node_id);

            if cancelled || cancel.is_cancelled() {
                cancelled = true;
                record.cancel();
                execution.node_executions.push(record);
                continue;
            }

            if node.is_trigger() {
                let mut output = Map::new();
                output.insert(
                    switchyard_workflow::DEFAULT_PORT.to_string(),
                    payload.clone(),
                );
                outputs.insert(*node_id, output.clone());
                record.succeed(output);
                execution.node_executions.push(record);
                continue;
            }

            let blocked = plan
                .graph
                .predecessors(*node_id)
                .iter()
                .filter(|(pred, _)| plan.reachable.contains(pred))
                .any(|(pred, _)| !outputs.contains_key(pred));
            if blocked {
                debug!(node_id = %node_id, "skipping node behind unfinished upstream");
                record.skip();
                execution.node_executions.push(record);
                continue;
            }

            let inputs = match self.gather_inputs(&plan, node, &outputs) {
                Ok(inputs) => inputs,
                Err(message) => {
                    warn!(node_id = %node_id, %message, "input routing failed");
                    record.fail(message);
                    execution.node_executions.push(record);
                    continue;
                }
            };

            // Resolved during planning, so the lookup cannot miss.
            let Some(runner) = plan.runners.get(node_id) else {
                continue;
            };
            record.start(JsonValue::Object(inputs.clone()));
            tokio::select! {
                () = cancel.cancelled() => {
                    cancelled = true;
                    record.cancel();
                }
                result = runner.run(node, JsonValue::Object(inputs)) => match result {
                    Ok(value) => {
                        let output = normalize_output(value);
                        outputs.insert(*node_id, output.clone());
                        record.succeed(output);
                    }
                    Err(e) => {
                        warn!(node_id = %node_id, error = %e, "node failed");
                        record.fail(e.message);
                    }
                },
            }
            execution.node_executions.push(record);
        }

        let state = if cancelled {
            ExecutionState::Cancelled
        } else if execution.any_failed() {
            ExecutionState::Failed
        } else {
            ExecutionState::Succeeded
        };
        execution.finish(state);
        info!(execution_id = %execution.id, state = ?execution.state, "execution finished");
        Ok(execution)
    }

    /// Builds the execution plan: ordered graph, reachable set, compiled
    /// conversions, and resolved runners.
    fn plan(&self, workflow: &Workflow, fired: &[NodeId]) -> Result<Plan, EngineError> {
        let graph = workflow.graph()?;
        let order = graph.topo_order()?;

        let roots = if fired.is_empty() {
            graph.sources()
        } else {
            fired.to_vec()
        };
        let reachable = graph.reachable_from(&roots);

        let mut conversions = HashMap::new();
        for connection in &workflow.connections {
            if !reachable.contains(&connection.from_node)
                || !reachable.contains(&connection.to_node)
            {
                continue;
            }
            if let Some(snippet) = &connection.conversion {
                let compiled = self.evaluator.compile(snippet).map_err(|e| {
                    EngineError::InvalidConversion {
                        connection_id: connection.id,
                        message: e.to_string(),
                    }
                })?;
                conversions.insert(connection.id, compiled);
            }
        }

        let mut runners = HashMap::new();
        for node in workflow.nodes.iter().filter(|n| reachable.contains(&n.id)) {
            if node.is_trigger() {
                continue;
            }
            let runner = self
                .runners
                .resolve(node)
                .ok_or_else(|| EngineError::NoRunner {
                    node_id: node.id,
                    kind: node.kind,
                    subtype: node.subtype.clone(),
                })?;
            runners.insert(node.id, runner);
        }

        Ok(Plan {
            graph,
            order,
            reachable,
            conversions,
            runners,
        })
    }

    /// Collects a node's inputs from its upstream output maps, applying
    /// edge conversions in transit. A port fed by several connections
    /// receives an array of values in connection declaration order.
    /// Each delivered value is checked against the declared data type of
    /// the receiving port; a mismatch fails the node. Null is always
    /// accepted, since an unpopulated upstream port routes null.
    fn gather_inputs(
        &self,
        plan: &Plan,
        node: &Node,
        outputs: &HashMap<NodeId, Map<String, JsonValue>>,
    ) -> Result<Map<String, JsonValue>, String> {
        let mut per_port: BTreeMap<String, Vec<JsonValue>> = BTreeMap::new();
        for (pred, edge) in plan.graph.predecessors(node.id) {
            let Some(upstream) = outputs.get(&pred) else {
                continue;
            };
            let mut value = upstream
                .get(&edge.output_key)
                .cloned()
                .unwrap_or(JsonValue::Null);
            if let Some(compiled) = plan.conversions.get(&edge.connection_id) {
                value = self
                    .evaluator
                    .apply(compiled, &value)
                    .map_err(|e| e.to_string())?;
            }
            if !value.is_null()
                && let Some(port) = node.input_port(&edge.input_port)
                && !port.data_type.accepts(&value)
            {
                return Err(format!(
                    "input `{}` expects {} but received an incompatible value",
                    edge.input_port, port.data_type
                ));
            }
            per_port.entry(edge.input_port.clone()).or_default().push(value);
        }

        let mut inputs = Map::new();
        for (port, mut values) in per_port {
            let value = if values.len() == 1 {
                values.remove(0)
            } else {
                JsonValue::Array(values)
            };
            inputs.insert(port, value);
        }
        Ok(inputs)
    }
}

struct Plan {
    graph: GraphModel,
    order: Vec<NodeId>,
    reachable: HashSet<NodeId>,
    conversions: HashMap<ConnectionId, CompiledConversion>,
    runners: HashMap<NodeId, Arc<dyn NodeRunner>>,
}

/// A runner may return its port map directly, or a bare value that
/// belongs under the default port.
fn normalize_output(value: JsonValue) -> Map<String, JsonValue> {
    match value {
        JsonValue::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert(switchyard_workflow::DEFAULT_PORT.to_string(), other);
            map
        }
    }
}
