//! Task runs and package-manager invocations.
//!
//! A [`TaskRun`] is the record of one external `swift` invocation that went
//! through a folder's [`TaskGate`](crate::gate::TaskGate).

use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Exit code reported for a run that was terminated on request.
pub const CANCELLED_EXIT_CODE: i32 = 130;

/// Exit code reported when the process was killed by a signal we did not send.
pub const SIGNALLED_EXIT_CODE: i32 = -1;

/// Kind of work a task performs.
///
/// Every kind except [`TaskKind::Build`] mutates the manifest-derived state
/// on disk (lock file, checkouts, edit-mode state).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Build,
    Resolve,
    Update,
    Edit,
    Unedit,
    Reset,
}

impl TaskKind {
    /// Returns true if this kind changes dependency state on disk.
    pub const fn is_mutating(self) -> bool {
        !matches!(self, Self::Build)
    }

    /// Human-readable title shown while the task runs.
    pub const fn title(self) -> &'static str {
        match self {
            Self::Build => "Build All",
            Self::Resolve => "Resolving Package Dependencies",
            Self::Update => "Updating Package Dependencies",
            Self::Edit => "Editing Package Dependency",
            Self::Unedit => "Finishing Dependency Edit",
            Self::Reset => "Resetting Package Dependencies",
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Resolve => "resolve",
            Self::Update => "update",
            Self::Edit => "edit",
            Self::Unedit => "unedit",
            Self::Reset => "reset",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully specified external command.
///
/// # Examples
///
/// ```
/// use swiftdeps_core::task::Invocation;
///
/// let invocation = Invocation::new("swift", "/work/pkg")
///     .arg("package")
///     .args(["edit", "--path", "/src/Swift-Markdown", "swift-markdown"]);
///
/// assert_eq!(
///     invocation.to_string(),
///     "swift package edit --path /src/Swift-Markdown swift-markdown"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

impl Invocation {
    pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Returns true if `args` appear contiguously in the argument list.
    pub fn has_args(&self, args: &[&str]) -> bool {
        args.is_empty()
            || self
                .args
                .windows(args.len())
                .any(|window| window.iter().zip(args).all(|(a, b)| a == b))
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Record of one task execution.
#[derive(Debug, Clone)]
pub struct TaskRun {
    pub id: u64,
    pub kind: TaskKind,
    pub folder: PathBuf,
    pub invocation: Invocation,
    /// `None` only while the task is still running.
    pub exit_code: Option<i32>,
    /// Interleaved stdout and stderr, one line per process line.
    pub output: String,
    pub started_at: Instant,
    pub finished_at: Option<Instant>,
    pub cancelled: bool,
}

impl TaskRun {
    pub fn succeeded(&self) -> bool {
        !self.cancelled && self.exit_code == Some(0)
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn duration(&self) -> Option<Duration> {
        self.finished_at
            .map(|end| end.saturating_duration_since(self.started_at))
    }

    /// Returns true if both runs were executing at the same instant.
    ///
    /// An unfinished run is treated as still running.
    pub fn overlaps(&self, other: &Self) -> bool {
        let ends_after = |run: &Self, instant: Instant| run.finished_at.is_none_or(|end| end > instant);
        ends_after(self, other.started_at) && ends_after(other, self.started_at)
    }
}
