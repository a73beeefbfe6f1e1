use crate::graph::TransitionError;
use crate::task::TaskKind;
use std::path::PathBuf;
use thiserror::Error;

/// Core error types for swiftdeps.
///
/// Covers everything that can go wrong while reading the on-disk state the
/// package manager owns (`Package.resolved`, `workspace-state.json`) and
/// while driving the dependency graph state machine.
///
/// # Examples
///
/// ```
/// use swiftdeps_core::error::{CoreError, Result};
///
/// fn read_pins(content: &str) -> Result<()> {
///     if content.is_empty() {
///         return Err(CoreError::ParseError {
///             file_type: "Package.resolved".into(),
///             source: Box::new(std::io::Error::new(
///                 std::io::ErrorKind::InvalidData,
///                 "empty content",
///             )),
///         });
///     }
///     Ok(())
/// }
///
/// assert!(read_pins("").is_err());
/// ```
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("failed to parse {file_type}: {source}")]
    ParseError {
        file_type: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("unsupported {file_type} format version: {version}")]
    UnsupportedFormat { file_type: String, version: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// Convenience type alias for `Result<T, CoreError>`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised by the task gate and process runners.
///
/// A non-zero exit of the package manager is *not* an error: it produces a
/// regular [`TaskRun`](crate::task::TaskRun) carrying the exit code and the
/// captured output. These variants cover the cases where a task could not be
/// started or was abandoned.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error(
        "cannot start {requested} in {}: {} is already running",
        .folder.display(),
        describe_active(.active)
    )]
    Conflict {
        folder: PathBuf,
        requested: TaskKind,
        active: Option<TaskKind>,
    },

    #[error("{kind} was cancelled {}", describe_phase(.started))]
    Cancelled { kind: TaskKind, started: bool },

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn describe_active(active: &Option<TaskKind>) -> String {
    active.map_or_else(|| "another task".to_string(), |kind| kind.to_string())
}

const fn describe_phase(started: &bool) -> &'static str {
    if *started {
        "while running"
    } else {
        "before it started"
    }
}
