//! Dependency workflow operations.
//!
//! Each operation takes the folder's gate once and runs every tool step under
//! that single permit, so a `reset` and the `resolve` that follows it can
//! never be split by another task. The dependency graph is checkpointed
//! before the first step and rolled back if the tool fails or the run is
//! cancelled.
//!
//! # Outcomes
//!
//! | Result | Meaning |
//! |---|---|
//! | `Ok(Succeeded)` | the tool exited 0 |
//! | `Ok(Failed)` | the tool ran and exited non-zero; output attached |
//! | `Ok(Cancelled)` | abandoned while queued or terminated while running |
//! | `Err(_)` | the operation could not be attempted |

use crate::error::Result;
use crate::folder::FolderContext;
use crate::workspace::WorkspaceContext;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use swiftdeps_core::lockfile::EDITS_DIR;
use swiftdeps_core::output;
use swiftdeps_core::{
    Admission, Checkpoint, GatePermit, Invocation, MissingProduct, TaskError, TaskKind, TaskRun,
};

/// What a finished tool run reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub kind: TaskKind,
    /// Command line of the last step that ran.
    pub command: String,
    pub exit_code: i32,
    /// Captured output of every step, in order.
    pub output: String,
}

impl ToolOutput {
    fn from_run(run: &TaskRun, output: String) -> Self {
        Self {
            kind: run.kind,
            command: run.invocation.to_string(),
            exit_code: run.exit_code.unwrap_or(swiftdeps_core::task::SIGNALLED_EXIT_CODE),
            output,
        }
    }

    /// Returns true if the output names an unresolved mandatory dependency.
    pub fn reports_missing_requirement(&self) -> bool {
        output::reports_missing_requirement(&self.output)
    }

    pub fn missing_products(&self) -> Vec<MissingProduct> {
        output::missing_products(&self.output)
    }

    pub fn unused_dependencies(&self) -> Vec<String> {
        output::unused_dependencies(&self.output)
    }
}

/// Result of a dependency operation that was attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Succeeded(ToolOutput),
    Failed(ToolOutput),
    /// Abandoned before it ran, or terminated while running.
    Cancelled,
}

impl CommandOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Captured output, if the tool ran to completion.
    pub fn output(&self) -> Option<&ToolOutput> {
        match self {
            Self::Succeeded(output) | Self::Failed(output) => Some(output),
            Self::Cancelled => None,
        }
    }
}

impl From<CommandOutcome> for bool {
    fn from(outcome: CommandOutcome) -> Self {
        outcome.succeeded()
    }
}

/// How one tool step ended.
enum Step {
    Done(TaskRun),
    Failed(TaskRun),
    Cancelled,
}

/// Runs dependency operations against workspace folders.
#[derive(Debug, Clone)]
pub struct DependencyCoordinator {
    workspace: Arc<WorkspaceContext>,
}

impl DependencyCoordinator {
    pub fn new(workspace: Arc<WorkspaceContext>) -> Self {
        Self { workspace }
    }

    pub fn workspace(&self) -> &Arc<WorkspaceContext> {
        &self.workspace
    }

    /// `swift package update`: moves every pin to the newest allowed version.
    pub async fn update_dependencies(&self, folder: &FolderContext) -> Result<CommandOutcome> {
        let Some(mut permit) = self.acquire(folder, TaskKind::Update).await? else {
            return Ok(CommandOutcome::Cancelled);
        };
        let mut transcript = String::new();
        self.resolve_under(folder, &mut permit, TaskKind::Update, &mut transcript)
            .await
    }

    /// `swift package resolve`: checks out what the lock file pins.
    ///
    /// Resolving an already-resolved package succeeds without changing the
    /// graph.
    pub async fn resolve_dependencies(&self, folder: &FolderContext) -> Result<CommandOutcome> {
        let Some(mut permit) = self.acquire(folder, TaskKind::Resolve).await? else {
            return Ok(CommandOutcome::Cancelled);
        };
        let mut transcript = String::new();
        self.resolve_under(folder, &mut permit, TaskKind::Resolve, &mut transcript)
            .await
    }

    /// `swift package edit --path <path> <name>`: takes the dependency's
    /// sources from a local directory.
    ///
    /// The override is not effective until the next successful resolve.
    pub async fn use_local_dependency(
        &self,
        folder: &FolderContext,
        name: &str,
        path: &Path,
    ) -> Result<CommandOutcome> {
        let Some(mut permit) = self.acquire(folder, TaskKind::Edit).await? else {
            return Ok(CommandOutcome::Cancelled);
        };
        let mut transcript = String::new();
        self.edit_under(folder, &mut permit, name, Some(path), &mut transcript)
            .await
    }

    /// Switches to a local directory and resolves in one operation.
    ///
    /// No other task can run between the edit and the resolve.
    pub async fn use_local_dependency_and_resolve(
        &self,
        folder: &FolderContext,
        name: &str,
        path: &Path,
    ) -> Result<CommandOutcome> {
        let Some(mut permit) = self.acquire(folder, TaskKind::Edit).await? else {
            return Ok(CommandOutcome::Cancelled);
        };
        let mut transcript = String::new();
        let edited = self
            .edit_under(folder, &mut permit, name, Some(path), &mut transcript)
            .await?;
        if !edited.succeeded() {
            return Ok(edited);
        }
        self.resolve_under(folder, &mut permit, TaskKind::Resolve, &mut transcript)
            .await
    }

    /// `swift package edit <name>`: checks the dependency out under
    /// `Packages/<name>` for local modification.
    pub async fn edit_dependency(
        &self,
        folder: &FolderContext,
        name: &str,
    ) -> Result<CommandOutcome> {
        let Some(mut permit) = self.acquire(folder, TaskKind::Edit).await? else {
            return Ok(CommandOutcome::Cancelled);
        };
        let mut transcript = String::new();
        self.edit_under(folder, &mut permit, name, None, &mut transcript)
            .await
    }

    /// `swift package unedit <name>`: returns the dependency to its pinned
    /// remote source.
    ///
    /// With `force_unedit` configured, a refusal because of uncommitted
    /// changes is retried with `--force`.
    pub async fn unedit_dependency(
        &self,
        folder: &FolderContext,
        name: &str,
    ) -> Result<CommandOutcome> {
        let Some(mut permit) = self.acquire(folder, TaskKind::Unedit).await? else {
            return Ok(CommandOutcome::Cancelled);
        };
        let checkpoint = folder.graph_lock().write().await.mark_unedited(name)?;
        let config = self.workspace.config();
        let mut transcript = String::new();

        let invocation = config.package_command(folder.root(), ["unedit", name]);
        let mut step = self.step(&mut permit, TaskKind::Unedit, invocation, &mut transcript).await;

        if config.force_unedit
            && let Ok(Step::Failed(run)) = &step
            && output::reports_uncommitted_changes(&run.output)
        {
            tracing::warn!(dependency = name, "discarding uncommitted changes");
            let invocation = config.package_command(folder.root(), ["unedit", "--force", name]);
            step = self.step(&mut permit, TaskKind::Unedit, invocation, &mut transcript).await;
        }

        self.settle(folder, checkpoint, step, transcript).await
    }

    /// `swift package reset`: discards checkouts, edits and build artifacts.
    ///
    /// Followed by a resolve under the same permit unless
    /// `resolve_after_reset` is disabled.
    pub async fn reset_package(&self, folder: &FolderContext) -> Result<CommandOutcome> {
        let Some(mut permit) = self.acquire(folder, TaskKind::Reset).await? else {
            return Ok(CommandOutcome::Cancelled);
        };
        let checkpoint = folder.graph_lock().write().await.reset()?;
        let mut transcript = String::new();

        let invocation = self.workspace.config().package_command(folder.root(), ["reset"]);
        let step = self.step(&mut permit, TaskKind::Reset, invocation, &mut transcript).await;
        let outcome = self.settle(folder, checkpoint, step, transcript.clone()).await?;

        if !outcome.succeeded() || !self.workspace.config().resolve_after_reset {
            return Ok(outcome);
        }
        self.resolve_under(folder, &mut permit, TaskKind::Resolve, &mut transcript)
            .await
    }

    /// `swift build --build-tests`.
    ///
    /// Builds always queue behind running dependency operations.
    pub async fn build(&self, folder: &FolderContext) -> Result<CommandOutcome> {
        let mut permit = match folder.gate().acquire(TaskKind::Build, Admission::Queue).await {
            Ok(permit) => permit,
            Err(TaskError::Cancelled { .. }) => return Ok(CommandOutcome::Cancelled),
            Err(e) => return Err(e.into()),
        };
        if folder.graph_lock().read().await.needs_resolve() {
            tracing::warn!(
                folder = %folder.root().display(),
                "building before dependency changes were resolved"
            );
        }

        let mut transcript = String::new();
        let invocation = self.workspace.config().build_command(folder.root());
        let step = self
            .step(&mut permit, TaskKind::Build, invocation, &mut transcript)
            .await?;
        let outcome = match step {
            Step::Done(run) => CommandOutcome::Succeeded(ToolOutput::from_run(&run, transcript)),
            Step::Failed(run) => CommandOutcome::Failed(ToolOutput::from_run(&run, transcript)),
            Step::Cancelled => CommandOutcome::Cancelled,
        };

        if let Some(output) = outcome.output() {
            for unused in output.unused_dependencies() {
                tracing::debug!(dependency = %unused, "dependency is not used by any target");
            }
            for missing in output.missing_products() {
                tracing::warn!(
                    product = %missing.product,
                    package = %missing.package,
                    "required product not found"
                );
            }
        }
        Ok(outcome)
    }

    /// Cancels every queued and running task of the folder.
    pub fn cancel(&self, folder: &FolderContext) -> bool {
        folder.cancel_all()
    }

    /// Takes the gate for a mutating operation. `None` if cancelled while queued.
    async fn acquire<'a>(
        &self,
        folder: &'a FolderContext,
        kind: TaskKind,
    ) -> Result<Option<GatePermit<'a>>> {
        match folder.gate().acquire(kind, self.workspace.config().admission).await {
            Ok(permit) => Ok(Some(permit)),
            Err(TaskError::Cancelled { .. }) => {
                tracing::info!(folder = %folder.root().display(), %kind, "abandoned while queued");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Runs one tool step, appending its output to `transcript`.
    async fn step(
        &self,
        permit: &mut GatePermit<'_>,
        kind: TaskKind,
        invocation: Invocation,
        transcript: &mut String,
    ) -> Result<Step> {
        let run = match permit.run(kind, invocation).await {
            Ok(run) => run,
            // Cancelled between steps of this operation.
            Err(TaskError::Cancelled { .. }) => return Ok(Step::Cancelled),
            Err(e) => return Err(e.into()),
        };
        transcript.push_str(&run.output);

        if run.cancelled {
            return Ok(Step::Cancelled);
        }
        if run.succeeded() {
            return Ok(Step::Done(run));
        }
        tracing::error!(
            folder = %run.folder.display(),
            task = %kind,
            exit_code = ?run.exit_code,
            "{} failed:\n{}",
            run.invocation,
            run.output
        );
        Ok(Step::Failed(run))
    }

    /// Runs `edit` and leaves the node `Edited` with a pending resolve.
    async fn edit_under(
        &self,
        folder: &FolderContext,
        permit: &mut GatePermit<'_>,
        name: &str,
        path: Option<&Path>,
        transcript: &mut String,
    ) -> Result<CommandOutcome> {
        let local: PathBuf = match path {
            Some(path) => path.to_path_buf(),
            None => folder.root().join(EDITS_DIR).join(name),
        };
        let checkpoint = folder.graph_lock().write().await.mark_edited(name, &local)?;

        let config = self.workspace.config();
        let invocation = match path {
            Some(path) => config.package_command(
                folder.root(),
                [
                    "edit".to_string(),
                    "--path".to_string(),
                    path.to_string_lossy().into_owned(),
                    name.to_string(),
                ],
            ),
            None => config.package_command(folder.root(), ["edit", name]),
        };
        let step = self.step(permit, TaskKind::Edit, invocation, transcript).await;
        self.settle(folder, checkpoint, step, transcript.clone()).await
    }

    /// Runs `resolve` or `update` and reconciles the graph with what the tool
    /// recorded on disk.
    async fn resolve_under(
        &self,
        folder: &FolderContext,
        permit: &mut GatePermit<'_>,
        kind: TaskKind,
        transcript: &mut String,
    ) -> Result<CommandOutcome> {
        let checkpoint = folder.graph_lock().write().await.begin_resolve()?;

        let invocation = self
            .workspace
            .config()
            .package_command(folder.root(), [kind.as_str()]);
        let run = match self.step(permit, kind, invocation, transcript).await {
            Ok(Step::Done(run)) => run,
            step => return self.settle(folder, checkpoint, step, transcript.clone()).await,
        };

        let snapshot = match self.workspace.snapshots().load(folder.root()).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                folder.graph_lock().write().await.rollback(checkpoint);
                return Err(e.into());
            }
        };
        let report = folder.graph_lock().write().await.complete_resolve(&snapshot);
        for (name, from, to) in &report.upgraded {
            tracing::info!(dependency = %name, %from, %to, "dependency updated");
        }
        for (name, from, to) in &report.downgraded {
            tracing::warn!(dependency = %name, %from, %to, "dependency moved to an older version");
        }
        if !report.added.is_empty() || !report.removed.is_empty() {
            tracing::debug!(added = ?report.added, removed = ?report.removed, "graph reconciled");
        }

        Ok(CommandOutcome::Succeeded(ToolOutput::from_run(&run, transcript.clone())))
    }

    /// Keeps the transition if the step succeeded, otherwise restores the
    /// checkpoint.
    async fn settle(
        &self,
        folder: &FolderContext,
        checkpoint: Checkpoint,
        step: Result<Step>,
        transcript: String,
    ) -> Result<CommandOutcome> {
        let outcome = match step {
            Ok(Step::Done(run)) => {
                return Ok(CommandOutcome::Succeeded(ToolOutput::from_run(
                    &run, transcript,
                )));
            }
            Ok(Step::Failed(run)) => Ok(CommandOutcome::Failed(ToolOutput::from_run(
                &run, transcript,
            ))),
            Ok(Step::Cancelled) => Ok(CommandOutcome::Cancelled),
            Err(e) => Err(e),
        };
        folder.graph_lock().write().await.rollback(checkpoint);
        tracing::debug!(folder = %folder.root().display(), "dependency graph rolled back");
        outcome
    }
}
