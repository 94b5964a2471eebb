use gauntlet_trace::{
    NodeId, RunId, TraceData, TraceEdge, TraceGraph, TraceNode,
};
use proptest::prelude::*;

fn retry_node(attempt: u32) -> TraceNode {
    TraceNode::new(TraceData::Retry {
        attempt,
        delay_ms: 0,
    })
}

proptest! {
    /// Whatever edge set is thrown at the graph, accepted edges never form a
    /// cycle: add_edge either succeeds and keeps the graph a DAG, or rejects
    /// and leaves the topology untouched.
    #[test]
    fn prop_trace_graph_remains_acyclic(
        node_count in 1..15usize,
        edges in proptest::collection::vec((0..15usize, 0..15usize), 0..40)
    ) {
        let graph = TraceGraph::new(RunId::new());
        let ids: Vec<NodeId> = (0..node_count)
            .map(|i| graph.add_node(retry_node(u32::try_from(i).unwrap())).unwrap())
            .collect();

        for (from, to) in edges {
            if from < ids.len() && to < ids.len() {
                let _ = graph.add_edge(TraceEdge {
                    source: ids[from],
                    target: ids[to],
                    label: None,
                    kind: None,
                });
                prop_assert!(graph.topological_order().is_ok());
            }
        }
    }

    /// Node ids stay unique regardless of how many nodes are appended.
    #[test]
    fn prop_node_ids_unique(count in 1..50usize) {
        let graph = TraceGraph::new(RunId::new());
        for i in 0..count {
            graph.add_node(retry_node(u32::try_from(i).unwrap())).unwrap();
        }
        let nodes = graph.nodes();
        let mut ids: Vec<NodeId> = nodes.iter().map(|n| n.id).collect();
        ids.sort_unstable();
        ids.dedup();
        prop_assert_eq!(ids.len(), count);
    }

    /// Chains built through parent links always verify: every non-root node
    /// has an incoming edge.
    #[test]
    fn prop_parent_chains_verify(count in 1..30usize) {
        let graph = TraceGraph::new(RunId::new());
        let mut previous = graph.add_node(retry_node(0)).unwrap();
        for i in 1..count {
            previous = graph
                .add_node(retry_node(u32::try_from(i).unwrap()).with_parent(previous))
                .unwrap();
        }
        prop_assert!(graph.seal().is_ok());
    }
}

#[test]
fn rejects_simple_cycle() {
    let graph = TraceGraph::new(RunId::new());
    let a = graph.add_node(retry_node(0)).unwrap();
    let b = graph.add_node(retry_node(1).with_parent(a)).unwrap();
    let c = graph.add_node(retry_node(2).with_parent(b)).unwrap();

    let result = graph.add_edge(TraceEdge {
        source: c,
        target: a,
        label: None,
        kind: None,
    });
    assert!(result.is_err());
}

#[test]
fn toposort_respects_parent_edges() {
    let graph = TraceGraph::new(RunId::new());
    let a = graph.add_node(retry_node(0)).unwrap();
    let b = graph.add_node(retry_node(1).with_parent(a)).unwrap();

    let order = graph.topological_order().unwrap();
    let index = |id| order.iter().position(|candidate| *candidate == id).unwrap();
    assert!(index(a) < index(b));
}
