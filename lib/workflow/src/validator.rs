//! Whole-document workflow validation.
//!
//! Validation never stops at the first problem: the full document is
//! checked and every violation is reported together, so an author can fix
//! a broken workflow in one pass.

use std::collections::HashMap;
use std::fmt;

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::DiGraph;

use crate::connection::ConnectionId;
use crate::definition::Workflow;
use crate::node::{Node, NodeId, NodeKind};
use crate::port::Port;
use crate::registry::{ConfigViolation, NodeSpec, SpecRegistry};

/// A single violation found in a workflow document.
#[derive(Debug, Clone, PartialEq)]
pub enum Violation {
    /// No spec is registered for the node's kind and subtype.
    UnknownSpec {
        node_id: NodeId,
        kind: NodeKind,
        subtype: Option<String>,
    },
    /// The node's configuration does not satisfy its spec.
    InvalidConfiguration {
        node_id: NodeId,
        violation: ConfigViolation,
    },
    /// A connection endpoint references a node not in the document.
    UnknownConnectionNode {
        connection_id: ConnectionId,
        node_id: NodeId,
    },
    /// A connection leaves from a port the source node does not have.
    MissingSourcePort {
        connection_id: ConnectionId,
        node_id: NodeId,
        port: String,
    },
    /// A connection arrives at a port the target node does not have.
    MissingTargetPort {
        connection_id: ConnectionId,
        node_id: NodeId,
        port: String,
    },
    /// A port has more connections than it allows.
    MaxConnectionsExceeded {
        node_id: NodeId,
        port: String,
        limit: u32,
        actual: usize,
    },
    /// A required input port has no incoming connection.
    RequiredInputUnconnected { node_id: NodeId, port: String },
    /// A designated trigger references a node not in the document.
    TriggerNotFound { node_id: NodeId },
    /// A designated trigger is not a trigger node.
    TriggerNotATrigger { node_id: NodeId, kind: NodeKind },
    /// The document's connections form a cycle.
    CycleDetected,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownSpec {
                node_id,
                kind,
                subtype,
            } => match subtype {
                Some(subtype) => {
                    write!(f, "node {node_id}: no spec for {kind}/{subtype}")
                }
                None => write!(f, "node {node_id}: no spec for {kind}"),
            },
            Self::InvalidConfiguration { node_id, violation } => {
                write!(f, "node {node_id}: {violation}")
            }
            Self::UnknownConnectionNode {
                connection_id,
                node_id,
            } => write!(f, "connection {connection_id}: unknown node {node_id}"),
            Self::MissingSourcePort {
                connection_id,
                node_id,
                port,
            } => write!(
                f,
                "connection {connection_id}: node {node_id} has no output port `{port}`"
            ),
            Self::MissingTargetPort {
                connection_id,
                node_id,
                port,
            } => write!(
                f,
                "connection {connection_id}: node {node_id} has no input port `{port}`"
            ),
            Self::MaxConnectionsExceeded {
                node_id,
                port,
                limit,
                actual,
            } => write!(
                f,
                "node {node_id}: port `{port}` allows {limit} connection(s) but has {actual}"
            ),
            Self::RequiredInputUnconnected { node_id, port } => {
                write!(f, "node {node_id}: required input `{port}` is unconnected")
            }
            Self::TriggerNotFound { node_id } => {
                write!(f, "trigger entry {node_id} is not in the document")
            }
            Self::TriggerNotATrigger { node_id, kind } => {
                write!(f, "trigger entry {node_id} is a {kind} node, not a trigger")
            }
            Self::CycleDetected => write!(f, "workflow connections form a cycle"),
        }
    }
}

/// Every violation found in one validation pass.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValidationReport {
    violations: Vec<Violation>,
}

impl ValidationReport {
    /// Returns the violations found.
    #[must_use]
    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    /// Returns true if no violations were found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    /// Returns the number of violations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.violations.len()
    }

    fn push(&mut self, violation: Violation) {
        self.violations.push(violation);
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} violation(s)", self.violations.len())?;
        for violation in &self.violations {
            write!(f, "\n  - {violation}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationReport {}

/// Validates a workflow document against a spec registry.
///
/// Returns `Ok(())` for a valid document, or the full report of every
/// violation found.
pub fn validate_workflow(
    workflow: &Workflow,
    registry: &SpecRegistry,
) -> Result<(), ValidationReport> {
    let mut report = ValidationReport::default();
    let nodes = workflow.node_map();

    check_nodes(workflow, registry, &mut report);
    check_connections(workflow, registry, &nodes, &mut report);
    check_triggers(workflow, &nodes, &mut report);
    check_acyclic(workflow, &nodes, &mut report);

    if report.is_empty() { Ok(()) } else { Err(report) }
}

fn check_nodes(workflow: &Workflow, registry: &SpecRegistry, report: &mut ValidationReport) {
    for node in &workflow.nodes {
        let Ok(spec) = registry.get(node.kind, node.subtype()) else {
            report.push(Violation::UnknownSpec {
                node_id: node.id,
                kind: node.kind,
                subtype: node.subtype.clone(),
            });
            continue;
        };
        for violation in spec.validate_configuration(&node.configuration) {
            report.push(Violation::InvalidConfiguration {
                node_id: node.id,
                violation,
            });
        }
    }
}

fn check_connections(
    workflow: &Workflow,
    registry: &SpecRegistry,
    nodes: &HashMap<NodeId, &Node>,
    report: &mut ValidationReport,
) {
    // (node, port) -> connection count, tracked separately per direction
    let mut outgoing: HashMap<(NodeId, &str), usize> = HashMap::new();
    let mut incoming: HashMap<(NodeId, &str), usize> = HashMap::new();

    for connection in &workflow.connections {
        let source = nodes.get(&connection.from_node).copied();
        let target = nodes.get(&connection.to_node).copied();

        if source.is_none() {
            report.push(Violation::UnknownConnectionNode {
                connection_id: connection.id,
                node_id: connection.from_node,
            });
        }
        if target.is_none() {
            report.push(Violation::UnknownConnectionNode {
                connection_id: connection.id,
                node_id: connection.to_node,
            });
        }

        if let Some(source) = source {
            if output_port(source, registry, &connection.from_port).is_none() {
                report.push(Violation::MissingSourcePort {
                    connection_id: connection.id,
                    node_id: source.id,
                    port: connection.from_port.clone(),
                });
            } else {
                *outgoing
                    .entry((source.id, connection.from_port.as_str()))
                    .or_default() += 1;
            }
        }
        if let Some(target) = target {
            if input_port(target, registry, &connection.to_port).is_none() {
                report.push(Violation::MissingTargetPort {
                    connection_id: connection.id,
                    node_id: target.id,
                    port: connection.to_port.clone(),
                });
            } else {
                *incoming
                    .entry((target.id, connection.to_port.as_str()))
                    .or_default() += 1;
            }
        }
    }

    for node in &workflow.nodes {
        for port in effective_ports(node, registry, Direction::Output) {
            let actual = outgoing
                .get(&(node.id, port.id.as_str()))
                .copied()
                .unwrap_or(0);
            if let Some(limit) = port.max_connections
                && actual > limit as usize
            {
                report.push(Violation::MaxConnectionsExceeded {
                    node_id: node.id,
                    port: port.id.clone(),
                    limit,
                    actual,
                });
            }
        }
        for port in effective_ports(node, registry, Direction::Input) {
            let actual = incoming
                .get(&(node.id, port.id.as_str()))
                .copied()
                .unwrap_or(0);
            if let Some(limit) = port.max_connections
                && actual > limit as usize
            {
                report.push(Violation::MaxConnectionsExceeded {
                    node_id: node.id,
                    port: port.id.clone(),
                    limit,
                    actual,
                });
            }
            if port.required && actual == 0 {
                report.push(Violation::RequiredInputUnconnected {
                    node_id: node.id,
                    port: port.id.clone(),
                });
            }
        }
    }
}

fn check_triggers(
    workflow: &Workflow,
    nodes: &HashMap<NodeId, &Node>,
    report: &mut ValidationReport,
) {
    for trigger_id in &workflow.triggers {
        match nodes.get(trigger_id) {
            None => report.push(Violation::TriggerNotFound {
                node_id: *trigger_id,
            }),
            Some(node) if !node.is_trigger() => report.push(Violation::TriggerNotATrigger {
                node_id: *trigger_id,
                kind: node.kind,
            }),
            Some(_) => {}
        }
    }
}

fn check_acyclic(
    workflow: &Workflow,
    nodes: &HashMap<NodeId, &Node>,
    report: &mut ValidationReport,
) {
    // Built from well-formed connections only, so a dangling endpoint
    // elsewhere in the report does not mask a cycle here.
    let mut graph = DiGraph::<NodeId, ()>::new();
    let mut indices = HashMap::with_capacity(workflow.nodes.len());
    for node in &workflow.nodes {
        indices.insert(node.id, graph.add_node(node.id));
    }
    for connection in &workflow.connections {
        if !nodes.contains_key(&connection.from_node) || !nodes.contains_key(&connection.to_node) {
            continue;
        }
        graph.add_edge(
            indices[&connection.from_node],
            indices[&connection.to_node],
            (),
        );
    }
    if is_cyclic_directed(&graph) {
        report.push(Violation::CycleDetected);
    }
}

#[derive(Clone, Copy)]
enum Direction {
    Input,
    Output,
}

/// Ports declared on the node itself, or inherited from the spec when the
/// node declares none.
fn effective_ports<'a>(
    node: &'a Node,
    registry: &'a SpecRegistry,
    direction: Direction,
) -> &'a [Port] {
    let declared = match direction {
        Direction::Input => &node.inputs,
        Direction::Output => &node.outputs,
    };
    if !declared.is_empty() {
        return declared;
    }
    registry
        .get(node.kind, node.subtype())
        .map(|spec: &NodeSpec| match direction {
            Direction::Input => spec.inputs.as_slice(),
            Direction::Output => spec.outputs.as_slice(),
        })
        .unwrap_or(&[])
}

fn input_port<'a>(node: &'a Node, registry: &'a SpecRegistry, id: &str) -> Option<&'a Port> {
    effective_ports(node, registry, Direction::Input)
        .iter()
        .find(|p| p.id == id)
}

fn output_port<'a>(node: &'a Node, registry: &'a SpecRegistry, id: &str) -> Option<&'a Port> {
    effective_ports(node, registry, Direction::Output)
        .iter()
        .find(|p| p.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use crate::port::{Port, PortDataType};
    use serde_json::json;

    fn manual_trigger() -> Node {
        Node::new("start", NodeKind::Trigger).with_subtype("manual")
    }

    fn transform(name: &str) -> Node {
        Node::new(name, NodeKind::Action)
            .with_subtype("transform")
            .with_parameter("script", json!("fn convert(input) { input }"))
    }

    #[test]
    fn valid_workflow_passes() {
        let registry = SpecRegistry::builtin();
        let mut workflow = Workflow::new("valid");
        let t = workflow.add_node(manual_trigger());
        let a = workflow.add_node(transform("work"));
        workflow.connect(Connection::between(t, a));

        assert!(validate_workflow(&workflow, &registry).is_ok());
    }

    #[test]
    fn all_violations_reported_in_one_pass() {
        let registry = SpecRegistry::builtin();
        let mut workflow = Workflow::new("broken");
        // unknown subtype
        let bad = workflow.add_node(Node::new("bad", NodeKind::Action).with_subtype("nope"));
        // missing required `script`
        let unconfigured =
            workflow.add_node(Node::new("unconfigured", NodeKind::Action).with_subtype("transform"));
        workflow.connect(Connection::between(bad, unconfigured));

        let report = validate_workflow(&workflow, &registry).expect_err("invalid");
        assert!(report.violations().iter().any(|v| matches!(
            v,
            Violation::UnknownSpec { node_id, .. } if *node_id == bad
        )));
        assert!(report.violations().iter().any(|v| matches!(
            v,
            Violation::InvalidConfiguration { node_id, .. } if *node_id == unconfigured
        )));
    }

    #[test]
    fn dangling_connection_endpoints_are_reported() {
        let registry = SpecRegistry::builtin();
        let mut workflow = Workflow::new("dangling");
        let t = workflow.add_node(manual_trigger());
        let ghost = NodeId::new();
        workflow.connect(Connection::between(t, ghost));

        let report = validate_workflow(&workflow, &registry).expect_err("invalid");
        assert!(report.violations().iter().any(|v| matches!(
            v,
            Violation::UnknownConnectionNode { node_id, .. } if *node_id == ghost
        )));
    }

    #[test]
    fn missing_ports_are_reported() {
        let registry = SpecRegistry::builtin();
        let mut workflow = Workflow::new("ports");
        let t = workflow.add_node(manual_trigger());
        let a = workflow.add_node(transform("work"));
        workflow.connect(Connection::new(t, "sidechannel", a, "main"));
        workflow.connect(Connection::new(t, "main", a, "aux"));

        let report = validate_workflow(&workflow, &registry).expect_err("invalid");
        assert!(report.violations().iter().any(|v| matches!(
            v,
            Violation::MissingSourcePort { port, .. } if port == "sidechannel"
        )));
        assert!(report.violations().iter().any(|v| matches!(
            v,
            Violation::MissingTargetPort { port, .. } if port == "aux"
        )));
    }

    #[test]
    fn max_connections_limit_is_enforced() {
        let registry = SpecRegistry::builtin();
        let mut workflow = Workflow::new("fan-in");
        let t = workflow.add_node(manual_trigger());
        let narrow = workflow.add_node(
            transform("narrow")
                .with_input(Port::required("main", PortDataType::Any).single())
                .with_output(Port::main()),
        );
        workflow.connect(Connection::between(t, narrow));
        workflow.connect(Connection::between(t, narrow));

        let report = validate_workflow(&workflow, &registry).expect_err("invalid");
        assert!(report.violations().iter().any(|v| matches!(
            v,
            Violation::MaxConnectionsExceeded {
                node_id,
                limit: 1,
                actual: 2,
                ..
            } if *node_id == narrow
        )));
    }

    #[test]
    fn required_input_must_be_connected() {
        let registry = SpecRegistry::builtin();
        let mut workflow = Workflow::new("lonely");
        workflow.add_node(manual_trigger());
        // transform's spec declares a required `main` input
        let lonely = workflow.add_node(transform("lonely"));

        let report = validate_workflow(&workflow, &registry).expect_err("invalid");
        assert!(report.violations().iter().any(|v| matches!(
            v,
            Violation::RequiredInputUnconnected { node_id, port } if *node_id == lonely && port == "main"
        )));
    }

    #[test]
    fn trigger_entries_must_be_trigger_nodes() {
        let registry = SpecRegistry::builtin();
        let mut workflow = Workflow::new("triggers");
        let t = workflow.add_node(manual_trigger());
        let a = workflow.add_node(transform("work"));
        workflow.connect(Connection::between(t, a));
        workflow.triggers.push(a);
        let ghost = NodeId::new();
        workflow.triggers.push(ghost);

        let report = validate_workflow(&workflow, &registry).expect_err("invalid");
        assert!(report.violations().iter().any(|v| matches!(
            v,
            Violation::TriggerNotATrigger { node_id, .. } if *node_id == a
        )));
        assert!(report.violations().iter().any(|v| matches!(
            v,
            Violation::TriggerNotFound { node_id } if *node_id == ghost
        )));
    }

    #[test]
    fn three_node_cycle_is_detected() {
        let registry = SpecRegistry::builtin();
        let mut workflow = Workflow::new("cycle");
        let a = workflow.add_node(transform("a"));
        let b = workflow.add_node(transform("b"));
        let c = workflow.add_node(transform("c"));
        workflow.connect(Connection::between(a, b));
        workflow.connect(Connection::between(b, c));
        workflow.connect(Connection::between(c, a));

        let report = validate_workflow(&workflow, &registry).expect_err("invalid");
        assert!(report.violations().contains(&Violation::CycleDetected));
    }

    #[test]
    fn repeated_validation_reports_the_same_violations() {
        let registry = SpecRegistry::builtin();
        let mut workflow = Workflow::new("stable");
        let bad = workflow.add_node(Node::new("bad", NodeKind::Action).with_subtype("nope"));
        let unconfigured =
            workflow.add_node(Node::new("unconfigured", NodeKind::Action).with_subtype("transform"));
        workflow.connect(Connection::between(bad, unconfigured));
        workflow.connect(Connection::between(unconfigured, NodeId::new()));

        let first = validate_workflow(&workflow, &registry).expect_err("invalid");
        let second = validate_workflow(&workflow, &registry).expect_err("invalid");
        assert_eq!(first, second);
        assert_eq!(first.len(), second.len());
    }

    #[test]
    fn report_display_lists_every_violation() {
        let registry = SpecRegistry::builtin();
        let mut workflow = Workflow::new("display");
        workflow.add_node(Node::new("bad", NodeKind::Tool).with_subtype("nope"));

        let report = validate_workflow(&workflow, &registry).expect_err("invalid");
        let text = report.to_string();
        assert!(text.contains("1 violation(s)"));
        assert!(text.contains("no spec for tool/nope"));
    }
}
