//! Error types for trace recording

use crate::ids::{NodeId, RunId};

/// Errors raised by the trace graph and recorder.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TraceError {
    /// No graph exists for the run id
    #[error("run not found: {0}")]
    RunNotFound(RunId),

    /// `start_run` called twice for the same run id
    #[error("run already started: {0}")]
    RunAlreadyStarted(RunId),

    /// Append attempted after the graph was sealed
    #[error("trace for run {0} is sealed")]
    Sealed(RunId),

    /// A node with this id was already recorded
    #[error("duplicate node id: {0}")]
    DuplicateNode(NodeId),

    /// An edge referenced a node that was never recorded
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    /// Edges from a node to itself are forbidden
    #[error("self-loop on node {0}")]
    SelfLoop(NodeId),

    /// The edge would have created a cycle
    #[error("edge {from} -> {to} would create a cycle")]
    CycleDetected {
        /// Edge source
        from: NodeId,
        /// Edge target
        to: NodeId,
    },

    /// A non-root node ended the run without any incoming edge
    #[error("node {0} is unreachable from the root")]
    UnreachableNode(NodeId),

    /// The storage collaborator rejected the sealed trace
    #[error("trace storage failed: {0}")]
    Storage(String),
}
