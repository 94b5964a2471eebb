//! Trace recorder
//!
//! Holds one append-only [`TraceGraph`] per run, keyed by run id. All
//! components of a run write through the same recorder; `end_run` seals the
//! graph and hands the snapshot to the external storage collaborator.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::TraceError;
use crate::graph::{TraceGraph, TraceSnapshot};
use crate::ids::{NodeId, RunId};
use crate::node::{EdgeKind, TraceEdge, TraceNode};

/// External destination for sealed traces.
///
/// The core only pushes; it never reads stored traces back mid-run.
pub trait TraceStorage: Send + Sync {
    /// Persist a sealed trace together with the run's metrics snapshot.
    ///
    /// # Errors
    /// Implementations surface their own failures as [`TraceError::Storage`].
    fn persist(&self, trace: &TraceSnapshot, metrics: &Value) -> Result<(), TraceError>;
}

/// Storage that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTraceStorage;

impl TraceStorage for NullTraceStorage {
    fn persist(&self, _trace: &TraceSnapshot, _metrics: &Value) -> Result<(), TraceError> {
        Ok(())
    }
}

/// In-memory storage backing the retrieval API in tests and demos.
#[derive(Debug, Default)]
pub struct MemoryTraceStorage {
    stored: Mutex<Vec<(TraceSnapshot, Value)>>,
}

impl MemoryTraceStorage {
    /// Create an empty store.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Retrieve a stored trace by run id.
    #[must_use]
    pub fn get(&self, run_id: RunId) -> Option<(TraceSnapshot, Value)> {
        self.stored
            .lock()
            .iter()
            .find(|(trace, _)| trace.run_id == run_id)
            .cloned()
    }

    /// Number of stored traces.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stored.lock().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stored.lock().is_empty()
    }
}

impl TraceStorage for MemoryTraceStorage {
    fn persist(&self, trace: &TraceSnapshot, metrics: &Value) -> Result<(), TraceError> {
        self.stored.lock().push((trace.clone(), metrics.clone()));
        Ok(())
    }
}

/// Per-run trace graphs with append-only recording.
pub struct TraceRecorder {
    graphs: DashMap<RunId, Arc<TraceGraph>>,
    storage: Arc<dyn TraceStorage>,
}

impl TraceRecorder {
    /// Create a recorder backed by the given storage collaborator.
    #[must_use]
    pub fn new(storage: Arc<dyn TraceStorage>) -> Self {
        Self {
            graphs: DashMap::new(),
            storage,
        }
    }

    /// Create a recorder that discards sealed traces.
    #[must_use]
    pub fn ephemeral() -> Self {
        Self::new(Arc::new(NullTraceStorage))
    }

    /// Open a fresh graph for a run.
    ///
    /// # Errors
    /// Returns [`TraceError::RunAlreadyStarted`] for a duplicate run id.
    pub fn start_run(&self, run_id: RunId) -> Result<(), TraceError> {
        match self.graphs.entry(run_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(TraceError::RunAlreadyStarted(run_id))
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(Arc::new(TraceGraph::new(run_id)));
                Ok(())
            }
        }
    }

    /// Append a node to a run's graph.
    ///
    /// # Errors
    /// [`TraceError::RunNotFound`] for unknown runs, otherwise the graph's
    /// own append errors.
    pub fn record_node(&self, run_id: RunId, node: TraceNode) -> Result<NodeId, TraceError> {
        self.graph(run_id)?.add_node(node)
    }

    /// Append an edge to a run's graph.
    ///
    /// # Errors
    /// [`TraceError::RunNotFound`] for unknown runs, otherwise the graph's
    /// own append errors.
    pub fn record_edge(
        &self,
        run_id: RunId,
        source: NodeId,
        target: NodeId,
        label: Option<String>,
        kind: Option<EdgeKind>,
    ) -> Result<(), TraceError> {
        self.graph(run_id)?.add_edge(TraceEdge {
            source,
            target,
            label,
            kind,
        })
    }

    /// Seal a run's graph, persist it, and return the snapshot.
    ///
    /// The graph stays retrievable through [`TraceRecorder::get_trace`] until
    /// evicted. Sealing happens even when verification fails so a partial
    /// trace survives abnormal endings.
    ///
    /// # Errors
    /// [`TraceError::RunNotFound`], verification errors from the graph, or
    /// [`TraceError::Storage`] from the collaborator.
    pub fn end_run(&self, run_id: RunId, metrics: &Value) -> Result<TraceSnapshot, TraceError> {
        let graph = self.graph(run_id)?;
        let verification = graph.seal();
        let snapshot = graph.snapshot();
        if let Err(err) = &verification {
            tracing::warn!(%run_id, %err, "trace verification failed at seal");
        }
        self.storage.persist(&snapshot, metrics)?;
        verification?;
        Ok(snapshot)
    }

    /// Fetch the live graph for a run.
    ///
    /// # Errors
    /// [`TraceError::RunNotFound`] for unknown run ids.
    pub fn get_trace(&self, run_id: RunId) -> Result<Arc<TraceGraph>, TraceError> {
        self.graph(run_id)
    }

    /// Drop a run's graph from memory. Persisted copies are unaffected.
    pub fn evict(&self, run_id: RunId) {
        self.graphs.remove(&run_id);
    }

    fn graph(&self, run_id: RunId) -> Result<Arc<TraceGraph>, TraceError> {
        self.graphs
            .get(&run_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(TraceError::RunNotFound(run_id))
    }
}

impl std::fmt::Debug for TraceRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceRecorder")
            .field("runs", &self.graphs.len())
            .finish_non_exhaustive()
    }
}
