//! Graph model derived from a workflow document.
//!
//! The graph model is the execution-facing view of a workflow: a directed
//! graph over node IDs with connection routing data on the edges. It
//! answers the scheduling questions the engine asks: what order can nodes
//! run in, where does an execution start, and what is downstream of a
//! given node.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::connection::ConnectionId;
use crate::definition::Workflow;
use crate::error::GraphError;
use crate::node::NodeId;

/// Routing data carried on a graph edge, taken from the connection it
/// was built from.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeData {
    /// The connection this edge was built from.
    pub connection_id: ConnectionId,
    /// The output port on the source node the value is read from.
    pub output_key: String,
    /// The input port on the target node the value is delivered to.
    pub input_port: String,
    /// Optional conversion snippet applied in transit.
    pub conversion: Option<String>,
}

/// Directed graph view over a workflow's nodes and connections.
///
/// Node indices follow declaration order, which makes every traversal
/// deterministic: ties in the topological order are broken by the
/// position of the node in the document.
#[derive(Debug, Clone)]
pub struct GraphModel {
    graph: DiGraph<NodeId, EdgeData>,
    node_index_map: HashMap<NodeId, NodeIndex>,
    trigger_roots: Vec<NodeId>,
}

impl GraphModel {
    /// Builds the graph model from a workflow document.
    ///
    /// Fails if any connection references a node that is not in the
    /// document. Cycles are not rejected here; they surface when a
    /// topological order is requested.
    pub fn build(workflow: &Workflow) -> Result<Self, GraphError> {
        let mut graph = DiGraph::new();
        let mut node_index_map = HashMap::with_capacity(workflow.nodes.len());

        for node in &workflow.nodes {
            let index = graph.add_node(node.id);
            node_index_map.insert(node.id, index);
        }

        for connection in &workflow.connections {
            let source = *node_index_map
                .get(&connection.from_node)
                .ok_or(GraphError::UnknownNode {
                    node_id: connection.from_node,
                })?;
            let target = *node_index_map
                .get(&connection.to_node)
                .ok_or(GraphError::UnknownNode {
                    node_id: connection.to_node,
                })?;
            graph.add_edge(
                source,
                target,
                EdgeData {
                    connection_id: connection.id,
                    output_key: connection.from_port.clone(),
                    input_port: connection.to_port.clone(),
                    conversion: connection.conversion.clone(),
                },
            );
        }

        Ok(Self {
            graph,
            node_index_map,
            trigger_roots: workflow.triggers.clone(),
        })
    }

    /// Returns the number of nodes in the graph.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns true if the node is part of this graph.
    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        self.node_index_map.contains_key(&id)
    }

    /// Computes a topological order over all nodes using Kahn's
    /// algorithm, breaking ties by declaration order.
    ///
    /// Returns `CycleDetected` if the graph has a cycle; a partial order
    /// is never returned.
    pub fn topo_order(&self) -> Result<Vec<NodeId>, GraphError> {
        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|index| {
                self.graph
                    .edges_directed(index, Direction::Incoming)
                    .count()
            })
            .collect();

        // Min-heap over node indices keeps the order stable across runs:
        // among ready nodes, the earliest-declared one goes first.
        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree == 0)
            .map(|(index, _)| Reverse(index))
            .collect();

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(Reverse(index)) = ready.pop() {
            let node_index = NodeIndex::new(index);
            order.push(self.graph[node_index]);
            for successor in self
                .graph
                .neighbors_directed(node_index, Direction::Outgoing)
            {
                in_degree[successor.index()] -= 1;
                if in_degree[successor.index()] == 0 {
                    ready.push(Reverse(successor.index()));
                }
            }
        }

        if order.len() != self.graph.node_count() {
            return Err(GraphError::CycleDetected);
        }
        Ok(order)
    }

    /// Returns the entry points of the graph: the designated trigger
    /// nodes, or every node with no incoming edges when none are
    /// designated.
    #[must_use]
    pub fn sources(&self) -> Vec<NodeId> {
        if !self.trigger_roots.is_empty() {
            return self.trigger_roots.clone();
        }
        self.graph
            .node_indices()
            .filter(|index| {
                self.graph
                    .edges_directed(*index, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .map(|index| self.graph[index])
            .collect()
    }

    /// Returns every node reachable from the given roots, including the
    /// roots themselves. Unknown roots are ignored.
    #[must_use]
    pub fn reachable_from(&self, roots: &[NodeId]) -> HashSet<NodeId> {
        let mut reachable = HashSet::new();
        let mut queue: VecDeque<NodeIndex> = roots
            .iter()
            .filter_map(|id| self.node_index_map.get(id).copied())
            .collect();

        while let Some(index) = queue.pop_front() {
            if !reachable.insert(self.graph[index]) {
                continue;
            }
            for successor in self.graph.neighbors_directed(index, Direction::Outgoing) {
                queue.push_back(successor);
            }
        }
        reachable
    }

    /// Returns the downstream neighbors of a node with the edge data of
    /// each connection, in connection declaration order.
    #[must_use]
    pub fn successors(&self, id: NodeId) -> Vec<(NodeId, &EdgeData)> {
        self.adjacent(id, Direction::Outgoing)
    }

    /// Returns the upstream neighbors of a node with the edge data of
    /// each connection, in connection declaration order.
    #[must_use]
    pub fn predecessors(&self, id: NodeId) -> Vec<(NodeId, &EdgeData)> {
        self.adjacent(id, Direction::Incoming)
    }

    fn adjacent(&self, id: NodeId, direction: Direction) -> Vec<(NodeId, &EdgeData)> {
        use petgraph::visit::EdgeRef;

        let Some(index) = self.node_index_map.get(&id) else {
            return Vec::new();
        };
        let mut edges: Vec<_> = self.graph.edges_directed(*index, direction).collect();
        // edges_directed walks the adjacency list newest-first
        edges.sort_by_key(|edge| edge.id());
        edges
            .into_iter()
            .map(|edge| {
                let neighbor = match direction {
                    Direction::Outgoing => edge.target(),
                    Direction::Incoming => edge.source(),
                };
                (self.graph[neighbor], edge.weight())
            })
            .collect()
    }
}
