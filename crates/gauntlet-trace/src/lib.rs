//! Causal trace graphs for Gauntlet runs
//!
//! Every planning, tool-call, validation, repair, retry and error event of a
//! run is appended to a per-run directed acyclic graph. The graph is strictly
//! append-only, sealed when the run ends, and exposes enough structure (ids,
//! kinds, parents, timestamps, latencies) for consumers to render or score a
//! run without re-deriving causality.

pub mod error;
pub mod graph;
pub mod ids;
pub mod layout;
pub mod node;
pub mod recorder;

pub use error::TraceError;
pub use graph::{TraceGraph, TraceSnapshot};
pub use ids::{NodeId, RunId, StepId};
pub use layout::{layout, LayoutEdge, LayoutNode, TraceLayout};
pub use node::{EdgeKind, TraceData, TraceEdge, TraceNode};
pub use recorder::{MemoryTraceStorage, NullTraceStorage, TraceRecorder, TraceStorage};
