//! Core abstractions for swiftdeps.
//!
//! This crate provides the building blocks the workflow coordinator is made
//! of. Nothing here knows about commands or configuration files.
//!
//! # Architecture
//!
//! swiftdeps-core defines:
//! - **Task Gate**: per-folder serialization of package-manager invocations
//! - **Process Runner**: the `ProcessRunner` trait and a tokio implementation
//! - **Dependency Graph**: the Locked / Resolving / Edited / Missing state machine
//! - **Lock File Reader**: snapshots of `Package.resolved` and `workspace-state.json`
//! - **Output Recognizers**: substring matching on package-manager diagnostics
//!
//! # Examples
//!
//! Running a task through a gate with a scripted runner:
//!
//! ```
//! use async_trait::async_trait;
//! use std::sync::Arc;
//! use swiftdeps_core::{
//!     Admission, CancelHandle, Invocation, ProcessOutput, ProcessRunner, TaskError, TaskGate,
//!     TaskKind,
//! };
//! use tokio::sync::broadcast;
//!
//! struct AlwaysResolves;
//!
//! #[async_trait]
//! impl ProcessRunner for AlwaysResolves {
//!     async fn run(
//!         &self,
//!         _invocation: &Invocation,
//!         _cancel: CancelHandle,
//!     ) -> Result<ProcessOutput, TaskError> {
//!         Ok(ProcessOutput::new(0, "Everything is already up-to-date\n"))
//!     }
//! }
//!
//! # tokio_test::block_on(async {
//! let (events, _) = broadcast::channel(16);
//! let gate = TaskGate::new("/work/pkg", Arc::new(AlwaysResolves), events);
//!
//! let invocation = Invocation::new("swift", "/work/pkg").args(["package", "resolve"]);
//! let run = gate.run(TaskKind::Resolve, invocation, Admission::Queue).await.unwrap();
//!
//! assert!(run.succeeded());
//! assert!(gate.is_idle());
//! # });
//! ```

pub mod error;
pub mod gate;
pub mod graph;
pub mod lockfile;
pub mod output;
pub mod process;
pub mod task;

// Re-export commonly used types
pub use error::{CoreError, Result, TaskError};
pub use gate::{ActiveTask, Admission, GatePermit, GateState, TaskEvent, TaskGate};
pub use graph::{
    Checkpoint, DependencyGraph, DependencyNode, DependencyState, ReconcileReport,
    TransitionError,
};
pub use lockfile::{DependencySnapshot, FileSnapshotProvider, PinnedPackage, SnapshotProvider};
pub use output::MissingProduct;
pub use process::{CancelHandle, ProcessOutput, ProcessRunner, TokioProcessRunner};
pub use task::{CANCELLED_EXIT_CODE, Invocation, TaskKind, TaskRun};
