//! Task status indicator.
//!
//! [`StatusBadge`] follows the workspace's task lifecycle events and keeps
//! the set of running tasks per folder, the way an editor status bar item
//! shows "Resolving Package Dependencies..." while a task is alive.
//!
//! # Drop Behavior
//!
//! The listener task is aborted when the badge is dropped. Tasks still shown
//! at that point are logged, since their `Finished` event will never be seen.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use swiftdeps_core::{TaskEvent, TaskKind};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// Running task shown by the badge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunningTask {
    pub id: u64,
    pub kind: TaskKind,
}

type Running = BTreeMap<PathBuf, RunningTask>;

/// Live view of the running tasks of every folder.
pub struct StatusBadge {
    state: watch::Receiver<Running>,
    listener: JoinHandle<()>,
}

impl StatusBadge {
    /// Starts following `events`.
    pub fn spawn(mut events: broadcast::Receiver<TaskEvent>) -> Self {
        let (tx, state) = watch::channel(Running::new());
        let listener = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => tx.send_modify(|running| apply(running, &event)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "status badge fell behind task events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Self { state, listener }
    }

    /// Text shown for a folder, or `None` when it is idle.
    pub fn text(&self, folder: &Path) -> Option<String> {
        self.state
            .borrow()
            .get(folder)
            .map(|task| format!("{}...", task.kind.title()))
    }

    pub fn running(&self, folder: &Path) -> Option<RunningTask> {
        self.state.borrow().get(folder).copied()
    }

    pub fn is_idle(&self) -> bool {
        self.state.borrow().is_empty()
    }

    /// Subscribes to badge changes.
    pub fn watch(&self) -> watch::Receiver<BTreeMap<PathBuf, RunningTask>> {
        self.state.clone()
    }
}

fn apply(running: &mut Running, event: &TaskEvent) {
    match event {
        TaskEvent::Started { id, folder, kind } => {
            running.insert(folder.clone(), RunningTask { id: *id, kind: *kind });
        }
        TaskEvent::Finished { id, folder, .. } => {
            // A late `Finished` must not hide a task that started after it.
            if running.get(folder).is_some_and(|task| task.id == *id) {
                running.remove(folder);
            }
        }
    }
}

impl Drop for StatusBadge {
    fn drop(&mut self) {
        let running = self.state.borrow();
        if !running.is_empty() {
            tracing::debug!(
                folders = running.len(),
                "StatusBadge dropped while tasks were still running"
            );
        }
        self.listener.abort();
    }
}

impl std::fmt::Debug for StatusBadge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusBadge")
            .field("running", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}
