//! Per-folder coordination state.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use swiftdeps_core::{DependencyGraph, DependencyNode, ProcessRunner, TaskEvent, TaskGate};
use tokio::sync::{RwLock, broadcast};

/// A package folder open in the workspace.
///
/// Owns exactly one [`TaskGate`] and the last known dependency graph. The
/// graph is only mutated by the operation holding the gate; readers get a
/// copy that may be stale while a task is running.
#[derive(Debug)]
pub struct FolderContext {
    root: PathBuf,
    gate: TaskGate,
    graph: RwLock<DependencyGraph>,
}

impl FolderContext {
    pub fn new(
        root: impl Into<PathBuf>,
        runner: Arc<dyn ProcessRunner>,
        events: broadcast::Sender<TaskEvent>,
        graph: DependencyGraph,
    ) -> Self {
        let root = root.into();
        Self {
            gate: TaskGate::new(root.clone(), runner, events),
            root,
            graph: RwLock::new(graph),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn gate(&self) -> &TaskGate {
        &self.gate
    }

    /// Copy of the current dependency graph.
    pub async fn graph(&self) -> DependencyGraph {
        self.graph.read().await.clone()
    }

    pub async fn dependency(&self, name: &str) -> Option<DependencyNode> {
        self.graph.read().await.get(name).cloned()
    }

    pub(crate) fn graph_lock(&self) -> &RwLock<DependencyGraph> {
        &self.graph
    }

    /// Cancels queued operations and signals the running one.
    ///
    /// Returns true if anything was cancelled.
    pub fn cancel_all(&self) -> bool {
        let dequeued = self.gate.cancel_pending();
        let signalled = self.gate.cancel_active();
        dequeued > 0 || signalled
    }
}
