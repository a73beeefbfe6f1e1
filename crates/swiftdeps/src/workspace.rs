use crate::config::WorkflowConfig;
use crate::error::{CoordinationError, Result};
use crate::folder::FolderContext;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use swiftdeps_core::{
    DependencyGraph, FileSnapshotProvider, ProcessRunner, SnapshotProvider, TaskEvent,
    TokioProcessRunner,
};
use tokio::sync::{RwLock, broadcast};

/// Capacity of the task lifecycle channel. Slow observers skip events.
const EVENT_CAPACITY: usize = 256;

/// All package folders of a workspace and the collaborators they share.
///
/// Folders are independent: each owns its own task gate, so work in one
/// folder never waits for another.
///
/// # Examples
///
/// ```no_run
/// use swiftdeps::config::WorkflowConfig;
/// use swiftdeps::workspace::WorkspaceContext;
///
/// # async fn example() -> swiftdeps::error::Result<()> {
/// let workspace = WorkspaceContext::new(WorkflowConfig::default());
/// workspace.focus_folder("/work/MyPackage").await?;
///
/// let folder = workspace.current_folder().await?;
/// println!("{} dependencies", folder.graph().await.len());
/// # Ok(())
/// # }
/// ```
pub struct WorkspaceContext {
    folders: DashMap<PathBuf, Arc<FolderContext>>,
    focused: RwLock<Option<PathBuf>>,
    config: WorkflowConfig,
    runner: Arc<dyn ProcessRunner>,
    snapshots: Arc<dyn SnapshotProvider>,
    events: broadcast::Sender<TaskEvent>,
}

impl WorkspaceContext {
    /// Creates a workspace that runs the real `swift` executable.
    pub fn new(config: WorkflowConfig) -> Self {
        let snapshots = match &config.scratch_path {
            Some(scratch) => FileSnapshotProvider::with_scratch_path(scratch),
            None => FileSnapshotProvider::new(),
        };
        Self::with_collaborators(config, Arc::new(TokioProcessRunner), Arc::new(snapshots))
    }

    pub fn with_collaborators(
        config: WorkflowConfig,
        runner: Arc<dyn ProcessRunner>,
        snapshots: Arc<dyn SnapshotProvider>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            folders: DashMap::new(),
            focused: RwLock::new(None),
            config,
            runner,
            snapshots,
            events,
        }
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn snapshots(&self) -> &Arc<dyn SnapshotProvider> {
        &self.snapshots
    }

    /// Subscribes to task lifecycle events of every folder.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    /// Opens a package folder, loading its current dependency state.
    ///
    /// Adding a folder twice returns the existing context. The first folder
    /// added becomes the focused one.
    pub async fn add_folder(&self, root: impl Into<PathBuf>) -> Result<Arc<FolderContext>> {
        let root = root.into();
        if let Some(existing) = self.folders.get(&root) {
            return Ok(Arc::clone(existing.value()));
        }

        let graph = match self.snapshots.load(&root).await {
            Ok(snapshot) => DependencyGraph::from_snapshot(&snapshot),
            Err(e) => {
                tracing::warn!("failed to load dependencies of {}: {}", root.display(), e);
                DependencyGraph::new()
            }
        };
        tracing::info!(
            folder = %root.display(),
            dependencies = graph.len(),
            "folder added"
        );

        // A concurrent add may have won the race; keep its context.
        let folder = Arc::clone(
            self.folders
                .entry(root.clone())
                .or_insert_with(|| {
                    Arc::new(FolderContext::new(
                        root.clone(),
                        Arc::clone(&self.runner),
                        self.events.clone(),
                        graph,
                    ))
                })
                .value(),
        );

        let mut focused = self.focused.write().await;
        if focused.is_none() {
            *focused = Some(root);
        }
        Ok(folder)
    }

    /// Closes a folder, cancelling its queued and running tasks.
    ///
    /// Returns false if the folder was not open.
    pub async fn remove_folder(&self, root: &Path) -> bool {
        let Some((_, folder)) = self.folders.remove(root) else {
            return false;
        };
        folder.cancel_all();

        let mut focused = self.focused.write().await;
        if focused.as_deref() == Some(root) {
            *focused = None;
        }
        tracing::info!(folder = %root.display(), "folder removed");
        true
    }

    /// Makes a folder the target of commands, opening it if needed.
    pub async fn focus_folder(&self, root: impl Into<PathBuf>) -> Result<Arc<FolderContext>> {
        let root = root.into();
        let folder = self.add_folder(root.clone()).await?;
        *self.focused.write().await = Some(root);
        Ok(folder)
    }

    /// The focused folder.
    pub async fn current_folder(&self) -> Result<Arc<FolderContext>> {
        let focused = self.focused.read().await.clone();
        let root = focused.ok_or(CoordinationError::NoActiveFolder)?;
        self.folder(&root)
    }

    pub fn folder(&self, root: &Path) -> Result<Arc<FolderContext>> {
        self.folders
            .get(root)
            .map(|folder| Arc::clone(folder.value()))
            .ok_or_else(|| CoordinationError::UnknownFolder(root.to_path_buf()))
    }

    pub fn folders(&self) -> Vec<Arc<FolderContext>> {
        self.folders
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn folder_count(&self) -> usize {
        self.folders.len()
    }

    /// Suspends until no folder has a task queued or running.
    pub async fn wait_for_no_running_tasks(&self) {
        let folders = self.folders();
        futures::future::join_all(folders.iter().map(|folder| folder.gate().wait_for_idle())).await;
    }

    /// Cancels all work and closes every folder.
    pub async fn shutdown(&self) {
        for folder in self.folders() {
            folder.cancel_all();
        }
        self.wait_for_no_running_tasks().await;
        self.folders.clear();
        *self.focused.write().await = None;
        tracing::info!("workspace shut down");
    }
}

impl std::fmt::Debug for WorkspaceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceContext")
            .field("folders", &self.folders.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
