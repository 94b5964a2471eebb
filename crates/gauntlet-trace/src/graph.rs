//! Append-only trace graph
//!
//! A per-run DAG of [`TraceNode`]s. Nodes and edges can only be appended;
//! edges that would create a cycle are rolled back and rejected; sealing the
//! graph rejects all further appends and checks the reachability invariant.

use parking_lot::RwLock;
use petgraph::algo::{is_cyclic_directed, toposort};
use petgraph::graphmap::DiGraphMap;
use petgraph::Direction;
use serde::{Deserialize, Serialize};

use crate::error::TraceError;
use crate::ids::{NodeId, RunId};
use crate::node::{EdgeKind, TraceEdge, TraceNode};

#[derive(Debug, Default)]
struct Inner {
    topology: DiGraphMap<NodeId, ()>,
    nodes: std::collections::HashMap<NodeId, TraceNode>,
    order: Vec<NodeId>,
    edges: Vec<TraceEdge>,
    root: Option<NodeId>,
    sealed: bool,
}

/// Append-only causal graph for a single run.
///
/// Safe for concurrent appends: all mutation happens under one short
/// write lock and no lock is held across a suspension point.
#[derive(Debug)]
pub struct TraceGraph {
    run_id: RunId,
    inner: RwLock<Inner>,
}

impl TraceGraph {
    /// Create an empty graph for a run.
    #[inline]
    #[must_use]
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Owning run id.
    #[inline]
    #[must_use]
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Append a node.
    ///
    /// The first node appended becomes the root. When the node carries a
    /// parent, the parent edge is recorded in the same operation.
    ///
    /// # Errors
    /// - [`TraceError::Sealed`] after `seal`
    /// - [`TraceError::DuplicateNode`] if the id was already recorded
    /// - [`TraceError::NodeNotFound`] if the parent was never recorded
    pub fn add_node(&self, node: TraceNode) -> Result<NodeId, TraceError> {
        let mut inner = self.inner.write();
        if inner.sealed {
            return Err(TraceError::Sealed(self.run_id));
        }
        if inner.nodes.contains_key(&node.id) {
            return Err(TraceError::DuplicateNode(node.id));
        }
        if let Some(parent) = node.parent {
            if !inner.nodes.contains_key(&parent) {
                return Err(TraceError::NodeNotFound(parent));
            }
        }

        let id = node.id;
        inner.topology.add_node(id);
        if inner.root.is_none() {
            inner.root = Some(id);
        }
        if let Some(parent) = node.parent {
            // Parent precedes child by construction, so this cannot cycle.
            inner.topology.add_edge(parent, id, ());
            inner.edges.push(TraceEdge {
                source: parent,
                target: id,
                label: None,
                kind: None,
            });
        }
        inner.order.push(id);
        inner.nodes.insert(id, node);
        Ok(id)
    }

    /// Append an edge between two recorded nodes.
    ///
    /// # Errors
    /// - [`TraceError::Sealed`] after `seal`
    /// - [`TraceError::NodeNotFound`] for unknown endpoints
    /// - [`TraceError::SelfLoop`] / [`TraceError::CycleDetected`] for edges
    ///   that would break the DAG invariant (the edge is rolled back)
    pub fn add_edge(&self, edge: TraceEdge) -> Result<(), TraceError> {
        let mut inner = self.inner.write();
        if inner.sealed {
            return Err(TraceError::Sealed(self.run_id));
        }
        if edge.source == edge.target {
            return Err(TraceError::SelfLoop(edge.source));
        }
        for endpoint in [edge.source, edge.target] {
            if !inner.nodes.contains_key(&endpoint) {
                return Err(TraceError::NodeNotFound(endpoint));
            }
        }

        let existed = inner.topology.contains_edge(edge.source, edge.target);
        if !existed {
            inner.topology.add_edge(edge.source, edge.target, ());
            if is_cyclic_directed(&inner.topology) {
                inner.topology.remove_edge(edge.source, edge.target);
                return Err(TraceError::CycleDetected {
                    from: edge.source,
                    to: edge.target,
                });
            }
        }
        inner.edges.push(edge);
        Ok(())
    }

    /// Seal the graph: all further appends are rejected.
    ///
    /// # Errors
    /// Returns [`TraceError::UnreachableNode`] if a non-root node has no
    /// incoming edge; the graph is sealed regardless so the partial trace
    /// stays inspectable.
    pub fn seal(&self) -> Result<(), TraceError> {
        let mut inner = self.inner.write();
        inner.sealed = true;
        verify_inner(&inner)
    }

    /// Check the DAG invariants without sealing.
    ///
    /// # Errors
    /// Returns [`TraceError::UnreachableNode`] for the first non-root node
    /// that has no incoming edge.
    pub fn verify(&self) -> Result<(), TraceError> {
        verify_inner(&self.inner.read())
    }

    /// Whether the graph is sealed.
    #[inline]
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.inner.read().sealed
    }

    /// Root node id, once any node was recorded.
    #[inline]
    #[must_use]
    pub fn root(&self) -> Option<NodeId> {
        self.inner.read().root
    }

    /// Number of recorded nodes.
    #[inline]
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.inner.read().order.len()
    }

    /// Number of recorded edges.
    #[inline]
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.inner.read().edges.len()
    }

    /// Look up a node by id.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<TraceNode> {
        self.inner.read().nodes.get(&id).cloned()
    }

    /// All nodes in insertion order.
    #[must_use]
    pub fn nodes(&self) -> Vec<TraceNode> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.nodes.get(id).cloned())
            .collect()
    }

    /// All edges in insertion order.
    #[must_use]
    pub fn edges(&self) -> Vec<TraceEdge> {
        self.inner.read().edges.clone()
    }

    /// Nodes with the given kind tag, in insertion order.
    #[must_use]
    pub fn nodes_of_kind(&self, kind: &str) -> Vec<TraceNode> {
        self.nodes()
            .into_iter()
            .filter(|node| node.data.kind() == kind)
            .collect()
    }

    /// Topological order of node ids.
    ///
    /// # Errors
    /// Cannot fail on a graph built through `add_edge` (cycles are rejected
    /// at insert time), but the signature keeps the check explicit.
    pub fn topological_order(&self) -> Result<Vec<NodeId>, TraceError> {
        let inner = self.inner.read();
        toposort(&inner.topology, None).map_err(|cycle| {
            let id = cycle.node_id();
            TraceError::CycleDetected { from: id, to: id }
        })
    }

    /// Direct predecessors of a node.
    #[must_use]
    pub fn predecessors(&self, id: NodeId) -> Vec<NodeId> {
        let inner = self.inner.read();
        inner
            .topology
            .neighbors_directed(id, Direction::Incoming)
            .collect()
    }

    /// Immutable snapshot of the graph contents.
    #[must_use]
    pub fn snapshot(&self) -> TraceSnapshot {
        let inner = self.inner.read();
        TraceSnapshot {
            run_id: self.run_id,
            root: inner.root,
            nodes: inner
                .order
                .iter()
                .filter_map(|id| inner.nodes.get(id).cloned())
                .collect(),
            edges: inner.edges.clone(),
            sealed: inner.sealed,
        }
    }
}

fn verify_inner(inner: &Inner) -> Result<(), TraceError> {
    for id in &inner.order {
        if Some(*id) == inner.root {
            continue;
        }
        let has_incoming = inner
            .topology
            .neighbors_directed(*id, Direction::Incoming)
            .next()
            .is_some();
        if !has_incoming {
            return Err(TraceError::UnreachableNode(*id));
        }
    }
    Ok(())
}

/// Serializable snapshot of a trace graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceSnapshot {
    /// Owning run
    pub run_id: RunId,
    /// Root node, if any node was recorded
    pub root: Option<NodeId>,
    /// Nodes in insertion order
    pub nodes: Vec<TraceNode>,
    /// Edges in insertion order
    pub edges: Vec<TraceEdge>,
    /// Whether the graph was sealed when the snapshot was taken
    pub sealed: bool,
}

impl TraceSnapshot {
    /// Number of nodes with the given kind tag.
    #[must_use]
    pub fn count_kind(&self, kind: &str) -> usize {
        self.nodes
            .iter()
            .filter(|node| node.data.kind() == kind)
            .count()
    }
}

/// Convenience constructor for labelled, classified edges.
#[inline]
#[must_use]
pub fn edge(source: NodeId, target: NodeId, kind: Option<EdgeKind>) -> TraceEdge {
    TraceEdge {
        source,
        target,
        label: None,
        kind,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::TraceData;

    fn error_node() -> TraceNode {
        TraceNode::new(TraceData::Error {
            kind: "tool_execution".to_string(),
            message: "boom".to_string(),
            attempts: 1,
        })
    }

    fn plan_node() -> TraceNode {
        TraceNode::new(TraceData::Plan {
            task: "t".to_string(),
            step_count: 1,
            confidence: None,
        })
    }

    #[test]
    fn first_node_becomes_root() {
        let graph = TraceGraph::new(RunId::new());
        let root = graph.add_node(plan_node()).unwrap();
        assert_eq!(graph.root(), Some(root));
    }

    #[test]
    fn parent_link_records_edge() {
        let graph = TraceGraph::new(RunId::new());
        let root = graph.add_node(plan_node()).unwrap();
        let child = graph.add_node(error_node().with_parent(root)).unwrap();

        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.predecessors(child), vec![root]);
    }

    #[test]
    fn duplicate_node_rejected() {
        let graph = TraceGraph::new(RunId::new());
        let node = plan_node();
        let duplicate = node.clone();
        graph.add_node(node).unwrap();
        assert_eq!(
            graph.add_node(duplicate.clone()),
            Err(TraceError::DuplicateNode(duplicate.id))
        );
    }

    #[test]
    fn cycle_rejected_and_rolled_back() {
        let graph = TraceGraph::new(RunId::new());
        let a = graph.add_node(plan_node()).unwrap();
        let b = graph.add_node(error_node().with_parent(a)).unwrap();

        let result = graph.add_edge(edge(b, a, None));
        assert_eq!(result, Err(TraceError::CycleDetected { from: b, to: a }));
        // The endpoints are plain data, not an error cause chain.
        let err = result.unwrap_err();
        assert!(std::error::Error::source(&err).is_none());
        // The rejected edge must not linger in the topology.
        assert_eq!(graph.edge_count(), 1);
        assert!(graph.topological_order().is_ok());
    }

    #[test]
    fn self_loop_rejected() {
        let graph = TraceGraph::new(RunId::new());
        let a = graph.add_node(plan_node()).unwrap();
        assert_eq!(
            graph.add_edge(edge(a, a, None)),
            Err(TraceError::SelfLoop(a))
        );
    }

    #[test]
    fn sealed_graph_rejects_appends() {
        let graph = TraceGraph::new(RunId::new());
        let root = graph.add_node(plan_node()).unwrap();
        graph.seal().unwrap();

        let result = graph.add_node(error_node().with_parent(root));
        assert!(matches!(result, Err(TraceError::Sealed(_))));
        assert!(graph.is_sealed());
    }

    #[test]
    fn seal_detects_unreachable_nodes() {
        let graph = TraceGraph::new(RunId::new());
        graph.add_node(plan_node()).unwrap();
        // No parent and no edge: unreachable once sealed.
        graph.add_node(error_node()).unwrap();

        assert!(matches!(graph.seal(), Err(TraceError::UnreachableNode(_))));
    }

    #[test]
    fn snapshot_preserves_insertion_order() {
        let graph = TraceGraph::new(RunId::new());
        let a = graph.add_node(plan_node()).unwrap();
        let b = graph.add_node(error_node().with_parent(a)).unwrap();

        let snapshot = graph.snapshot();
        assert_eq!(snapshot.nodes[0].id, a);
        assert_eq!(snapshot.nodes[1].id, b);
        assert_eq!(snapshot.count_kind("error"), 1);
    }
}
