//! Layout projection for trace rendering
//!
//! Computes a layered, render-ready view of a trace graph: each node gets a
//! position derived from its longest path from the root, each edge keeps its
//! label and kind. Consumers draw this directly without re-deriving
//! causality.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TraceError;
use crate::graph::TraceGraph;
use crate::ids::{NodeId, StepId};
use crate::node::EdgeKind;

/// Horizontal distance between layers.
const LAYER_SPACING: f64 = 220.0;
/// Vertical distance between nodes in one layer.
const ROW_SPACING: f64 = 110.0;

/// A positioned node ready for rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutNode {
    /// Node id
    pub id: NodeId,
    /// Kind tag (`plan`, `tool_call`, ...)
    pub kind: String,
    /// Short display label
    pub label: String,
    /// Owning plan step, if any
    pub step: Option<StepId>,
    /// Horizontal position
    pub x: f64,
    /// Vertical position
    pub y: f64,
    /// Recorded latency in milliseconds
    pub latency_ms: Option<u64>,
    /// Recording timestamp
    pub timestamp: DateTime<Utc>,
}

/// A labelled edge between positioned nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutEdge {
    /// Source node
    pub source: NodeId,
    /// Target node
    pub target: NodeId,
    /// Display label
    pub label: Option<String>,
    /// Edge classification
    pub kind: Option<EdgeKind>,
}

/// Render-ready projection of a trace graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceLayout {
    /// Positioned nodes in topological order
    pub nodes: Vec<LayoutNode>,
    /// Edges with labels and kinds
    pub edges: Vec<LayoutEdge>,
    /// Number of layers
    pub depth: usize,
}

/// Compute the layered layout of a graph.
///
/// Layer assignment is the longest path from any entry node, so retries and
/// repairs line up after the attempts that caused them.
///
/// # Errors
/// Propagates [`TraceError`] if the graph's topology cannot be ordered.
pub fn layout(graph: &TraceGraph) -> Result<TraceLayout, TraceError> {
    let order = graph.topological_order()?;

    let mut layers: HashMap<NodeId, usize> = HashMap::with_capacity(order.len());
    for id in &order {
        let layer = graph
            .predecessors(*id)
            .iter()
            .filter_map(|pred| layers.get(pred))
            .max()
            .map_or(0, |deepest| deepest + 1);
        layers.insert(*id, layer);
    }

    let mut rows_per_layer: HashMap<usize, usize> = HashMap::new();
    let mut nodes = Vec::with_capacity(order.len());
    for id in &order {
        let Some(node) = graph.node(*id) else {
            continue;
        };
        let layer = layers.get(id).copied().unwrap_or(0);
        let row = rows_per_layer.entry(layer).or_insert(0);
        #[allow(clippy::cast_precision_loss)]
        let (x, y) = (layer as f64 * LAYER_SPACING, *row as f64 * ROW_SPACING);
        *row += 1;

        nodes.push(LayoutNode {
            id: *id,
            kind: node.data.kind().to_string(),
            label: node.data.label(),
            step: node.step,
            x,
            y,
            latency_ms: node.latency_ms,
            timestamp: node.timestamp,
        });
    }

    let edges = graph
        .edges()
        .into_iter()
        .map(|edge| LayoutEdge {
            source: edge.source,
            target: edge.target,
            label: edge.label,
            kind: edge.kind,
        })
        .collect();

    let depth = rows_per_layer.keys().max().map_or(0, |deepest| deepest + 1);
    Ok(TraceLayout {
        nodes,
        edges,
        depth,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::edge;
    use crate::ids::RunId;
    use crate::node::{TraceData, TraceNode};

    fn node(kind_hint: u32) -> TraceNode {
        TraceNode::new(TraceData::Retry {
            attempt: kind_hint,
            delay_ms: 0,
        })
    }

    #[test]
    fn layers_follow_longest_path() {
        let graph = TraceGraph::new(RunId::new());
        let a = graph
            .add_node(TraceNode::new(TraceData::Plan {
                task: "t".to_string(),
                step_count: 2,
                confidence: None,
            }))
            .unwrap();
        let b = graph.add_node(node(1).with_parent(a)).unwrap();
        let c = graph.add_node(node(2).with_parent(b)).unwrap();
        // Diamond: a -> c directly as well; c must still sit after b.
        graph.add_edge(edge(a, c, None)).unwrap();

        let layout = layout(&graph).unwrap();
        assert_eq!(layout.depth, 3);

        let position = |id: NodeId| {
            layout
                .nodes
                .iter()
                .find(|candidate| candidate.id == id)
                .map(|candidate| candidate.x)
                .unwrap()
        };
        assert!(position(a) < position(b));
        assert!(position(b) < position(c));
    }

    #[test]
    fn parallel_branches_share_a_layer() {
        let graph = TraceGraph::new(RunId::new());
        let root = graph
            .add_node(TraceNode::new(TraceData::Plan {
                task: "t".to_string(),
                step_count: 2,
                confidence: None,
            }))
            .unwrap();
        let left = graph.add_node(node(1).with_parent(root)).unwrap();
        let right = graph.add_node(node(2).with_parent(root)).unwrap();

        let layout = layout(&graph).unwrap();
        let find = |id: NodeId| {
            layout
                .nodes
                .iter()
                .find(|candidate| candidate.id == id)
                .cloned()
                .unwrap()
        };
        let (left, right) = (find(left), find(right));
        assert!((left.x - right.x).abs() < f64::EPSILON);
        assert!((left.y - right.y).abs() > f64::EPSILON);
    }

    #[test]
    fn layout_preserves_edge_metadata() {
        let graph = TraceGraph::new(RunId::new());
        let a = graph.add_node(node(1)).unwrap();
        let b = graph.add_node(node(2).with_parent(a)).unwrap();
        graph
            .add_edge(crate::node::TraceEdge {
                source: a,
                target: b,
                label: Some("retry 1".to_string()),
                kind: Some(EdgeKind::Retry),
            })
            .unwrap();

        let layout = layout(&graph).unwrap();
        assert!(layout
            .edges
            .iter()
            .any(|edge| edge.kind == Some(EdgeKind::Retry)
                && edge.label.as_deref() == Some("retry 1")));
    }
}
