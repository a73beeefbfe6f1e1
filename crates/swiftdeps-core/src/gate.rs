//! Per-folder task gate.
//!
//! A [`TaskGate`] serializes every task that touches a folder's manifest,
//! lock file and checkouts. Callers either queue behind the current holder
//! (FIFO, backed by tokio's fair mutex) or are rejected with
//! [`TaskError::Conflict`], depending on the requested [`Admission`].
//!
//! # Lifecycle events
//!
//! Every run publishes [`TaskEvent::Started`] and [`TaskEvent::Finished`] on
//! the broadcast channel handed to [`TaskGate::new`]. Events are
//! best-effort: with no subscribers they are dropped.
//!
//! # Cancellation
//!
//! - Queued callers can be dequeued with [`TaskGate::cancel_pending`]; they
//!   fail with `TaskError::Cancelled { started: false }` and have no effect.
//! - The current holder can be cancelled with [`TaskGate::cancel_active`].
//!   A running process is signalled and still completes (sentinel exit
//!   code, partial output) before the gate is released. The permit then
//!   refuses to start further tasks.

use crate::error::TaskError;
use crate::process::{CancelHandle, ProcessRunner};
use crate::task::{Invocation, TaskKind, TaskRun};
use dashmap::DashMap;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::{Mutex, OwnedMutexGuard, broadcast, watch};

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

fn next_task_id() -> u64 {
    NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed)
}

/// What to do when the gate is already held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Admission {
    /// Wait for the gate in submission order.
    #[default]
    Queue,
    /// Fail immediately with [`TaskError::Conflict`].
    Reject,
}

/// Task lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    Started {
        id: u64,
        folder: PathBuf,
        kind: TaskKind,
    },
    Finished {
        id: u64,
        folder: PathBuf,
        kind: TaskKind,
        /// `None` when the process could not be run at all.
        exit_code: Option<i32>,
        cancelled: bool,
    },
}

impl TaskEvent {
    pub fn id(&self) -> u64 {
        match self {
            Self::Started { id, .. } | Self::Finished { id, .. } => *id,
        }
    }

    pub fn folder(&self) -> &Path {
        match self {
            Self::Started { folder, .. } | Self::Finished { folder, .. } => folder,
        }
    }

    pub fn kind(&self) -> TaskKind {
        match self {
            Self::Started { kind, .. } | Self::Finished { kind, .. } => *kind,
        }
    }
}

/// The process currently running under a gate.
#[derive(Debug, Clone)]
pub struct ActiveTask {
    pub id: u64,
    pub kind: TaskKind,
    pub started_at: Instant,
    cancel: CancelHandle,
}

/// Observable state of a gate.
#[derive(Debug, Clone, Default)]
pub struct GateState {
    /// Operation holding the gate, if any. A holder may run several tasks.
    pub holder: Option<TaskKind>,
    pub running: Option<ActiveTask>,
    /// Callers queued for the gate.
    pub pending: usize,
    holder_cancel: Option<CancelHandle>,
}

impl GateState {
    /// True when nothing holds, runs or waits.
    pub fn is_idle(&self) -> bool {
        self.holder.is_none() && self.running.is_none() && self.pending == 0
    }

    fn hold(&mut self, kind: TaskKind, cancel: &CancelHandle) {
        self.holder = Some(kind);
        self.holder_cancel = Some(cancel.clone());
    }
}

struct PendingTask {
    kind: TaskKind,
    cancel: CancelHandle,
}

/// Serializes tasks for one workspace folder.
pub struct TaskGate {
    folder: PathBuf,
    runner: Arc<dyn ProcessRunner>,
    lock: Arc<Mutex<()>>,
    state: watch::Sender<GateState>,
    pending: DashMap<u64, PendingTask>,
    events: broadcast::Sender<TaskEvent>,
}

impl TaskGate {
    pub fn new(
        folder: impl Into<PathBuf>,
        runner: Arc<dyn ProcessRunner>,
        events: broadcast::Sender<TaskEvent>,
    ) -> Self {
        let (state, _) = watch::channel(GateState::default());
        Self {
            folder: folder.into(),
            runner,
            lock: Arc::new(Mutex::new(())),
            state,
            pending: DashMap::new(),
            events,
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn state(&self) -> GateState {
        self.state.borrow().clone()
    }

    pub fn is_idle(&self) -> bool {
        self.state.borrow().is_idle()
    }

    /// Number of callers waiting for the gate.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Subscribes to gate state changes.
    pub fn watch(&self) -> watch::Receiver<GateState> {
        self.state.subscribe()
    }

    /// Suspends until no operation holds or waits for the gate.
    ///
    /// Does not take a place in the queue: a caller that wants to run next
    /// should use [`acquire`](Self::acquire) instead.
    pub async fn wait_for_idle(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(GateState::is_idle).await;
    }

    /// Takes the gate for one operation, which may run several tasks.
    pub async fn acquire(
        &self,
        kind: TaskKind,
        admission: Admission,
    ) -> Result<GatePermit<'_>, TaskError> {
        let cancel = CancelHandle::new();
        let guard = match admission {
            Admission::Reject => {
                let guard = Arc::clone(&self.lock).try_lock_owned().map_err(|_| {
                    TaskError::Conflict {
                        folder: self.folder.clone(),
                        requested: kind,
                        active: self.current_kind(),
                    }
                })?;
                self.state.send_modify(|state| state.hold(kind, &cancel));
                guard
            }
            Admission::Queue => self.enqueue(kind, &cancel).await?,
        };
        tracing::debug!(folder = %self.folder.display(), %kind, "gate acquired");

        Ok(GatePermit {
            gate: self,
            kind,
            cancel,
            _guard: guard,
        })
    }

    /// Acquires the gate and runs a single task.
    pub async fn run(
        &self,
        kind: TaskKind,
        invocation: Invocation,
        admission: Admission,
    ) -> Result<TaskRun, TaskError> {
        let mut permit = self.acquire(kind, admission).await?;
        permit.run(kind, invocation).await
    }

    /// Cancels the operation holding the gate.
    ///
    /// Signals its running process, if any, and stops it from starting
    /// another task. Returns false if the gate is not held.
    pub fn cancel_active(&self) -> bool {
        let state = self.state.borrow();
        if let Some(task) = &state.running {
            tracing::info!(folder = %self.folder.display(), kind = %task.kind, "cancelling running task");
            task.cancel.cancel();
        }
        match (&state.holder_cancel, state.holder) {
            (Some(cancel), Some(kind)) => {
                if state.running.is_none() {
                    tracing::info!(folder = %self.folder.display(), %kind, "cancelling operation between tasks");
                }
                cancel.cancel();
                true
            }
            _ => state.running.is_some(),
        }
    }

    /// Dequeues every waiting caller. Returns how many were cancelled.
    pub fn cancel_pending(&self) -> usize {
        let queued: Vec<(TaskKind, CancelHandle)> = self
            .pending
            .iter()
            .map(|entry| (entry.kind, entry.cancel.clone()))
            .collect();

        for (kind, cancel) in &queued {
            tracing::info!(folder = %self.folder.display(), %kind, "cancelling queued task");
            cancel.cancel();
        }
        queued.len()
    }

    fn current_kind(&self) -> Option<TaskKind> {
        let state = self.state.borrow();
        state.running.as_ref().map(|task| task.kind).or(state.holder)
    }

    async fn enqueue(
        &self,
        kind: TaskKind,
        holder_cancel: &CancelHandle,
    ) -> Result<OwnedMutexGuard<()>, TaskError> {
        let id = next_task_id();
        let cancel = CancelHandle::new();
        self.pending.insert(
            id,
            PendingTask {
                kind,
                cancel: cancel.clone(),
            },
        );
        self.state.send_modify(|state| state.pending += 1);
        let mut entry = PendingEntry {
            gate: self,
            id,
            admitted: None,
        };

        if self.current_kind().is_some() {
            tracing::debug!(folder = %self.folder.display(), %kind, "waiting for gate");
        }

        let guard = tokio::select! {
            guard = Arc::clone(&self.lock).lock_owned() => guard,
            () = cancel.cancelled() => return Err(TaskError::Cancelled { kind, started: false }),
        };
        // Leaving the queue and taking the gate is one state change.
        entry.admitted = Some((kind, holder_cancel.clone()));
        Ok(guard)
    }

    fn emit(&self, event: TaskEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

impl std::fmt::Debug for TaskGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGate")
            .field("folder", &self.folder)
            .field("state", &*self.state.borrow())
            .field("pending", &self.pending.len())
            .finish()
    }
}

/// Removes a queue entry however the wait ends, including when the waiting
/// future is dropped.
struct PendingEntry<'a> {
    gate: &'a TaskGate,
    id: u64,
    admitted: Option<(TaskKind, CancelHandle)>,
}

impl Drop for PendingEntry<'_> {
    fn drop(&mut self) {
        self.gate.pending.remove(&self.id);
        let admitted = self.admitted.take();
        self.gate.state.send_modify(|state| {
            state.pending = state.pending.saturating_sub(1);
            if let Some((kind, cancel)) = &admitted {
                state.hold(*kind, cancel);
            }
        });
    }
}

/// Exclusive hold on a folder's gate.
///
/// Runs are sequential (`&mut self`), so at most one process is alive per
/// folder. The gate is released when the permit is dropped.
pub struct GatePermit<'a> {
    gate: &'a TaskGate,
    kind: TaskKind,
    cancel: CancelHandle,
    _guard: OwnedMutexGuard<()>,
}

impl GatePermit<'_> {
    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn folder(&self) -> &Path {
        &self.gate.folder
    }

    /// True once [`TaskGate::cancel_active`] reached this operation.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Runs one task while holding the gate.
    ///
    /// Fails with `TaskError::Cancelled { started: false }` once the
    /// operation has been cancelled.
    pub async fn run(&mut self, kind: TaskKind, invocation: Invocation) -> Result<TaskRun, TaskError> {
        let gate = self.gate;
        if self.cancel.is_cancelled() {
            tracing::info!(folder = %gate.folder.display(), task = %kind, "operation cancelled, not starting task");
            return Err(TaskError::Cancelled {
                kind,
                started: false,
            });
        }
        let id = next_task_id();
        let cancel = self.cancel.clone();
        let started_at = Instant::now();

        let _slot = RunningSlot::occupy(
            gate,
            ActiveTask {
                id,
                kind,
                started_at,
                cancel: cancel.clone(),
            },
        );
        gate.emit(TaskEvent::Started {
            id,
            folder: gate.folder.clone(),
            kind,
        });
        tracing::info!(folder = %gate.folder.display(), task = %kind, command = %invocation, "task started");

        let result = gate.runner.run(&invocation, cancel).await;
        let finished_at = Instant::now();

        match result {
            Ok(output) => {
                gate.emit(TaskEvent::Finished {
                    id,
                    folder: gate.folder.clone(),
                    kind,
                    exit_code: Some(output.exit_code),
                    cancelled: output.cancelled,
                });
                if output.cancelled {
                    tracing::warn!(folder = %gate.folder.display(), task = %kind, "task cancelled");
                } else {
                    tracing::info!(
                        folder = %gate.folder.display(),
                        task = %kind,
                        exit_code = output.exit_code,
                        elapsed_ms = finished_at.duration_since(started_at).as_millis() as u64,
                        "task finished"
                    );
                }
                Ok(TaskRun {
                    id,
                    kind,
                    folder: gate.folder.clone(),
                    invocation,
                    exit_code: Some(output.exit_code),
                    output: output.output,
                    started_at,
                    finished_at: Some(finished_at),
                    cancelled: output.cancelled,
                })
            }
            Err(e) => {
                gate.emit(TaskEvent::Finished {
                    id,
                    folder: gate.folder.clone(),
                    kind,
                    exit_code: None,
                    cancelled: false,
                });
                tracing::error!(folder = %gate.folder.display(), task = %kind, "task could not run: {}", e);
                Err(e)
            }
        }
    }
}

impl Drop for GatePermit<'_> {
    fn drop(&mut self) {
        // Runs before `_guard` is released, so the next holder cannot be
        // overwritten.
        self.gate.state.send_modify(|state| {
            state.holder = None;
            state.holder_cancel = None;
        });
        tracing::debug!(folder = %self.gate.folder.display(), kind = %self.kind, "gate released");
    }
}

/// Marks a task as running for as long as it is alive.
struct RunningSlot<'a> {
    gate: &'a TaskGate,
}

impl<'a> RunningSlot<'a> {
    fn occupy(gate: &'a TaskGate, task: ActiveTask) -> Self {
        gate.state.send_modify(|state| state.running = Some(task));
        Self { gate }
    }
}

impl Drop for RunningSlot<'_> {
    fn drop(&mut self) {
        self.gate.state.send_modify(|state| state.running = None);
    }
}
