use std::path::PathBuf;
use swiftdeps_core::{CoreError, TaskError, TransitionError};
use thiserror::Error;

/// Reasons a dependency operation could not be attempted.
///
/// A package-manager run that exits non-zero is not an error: it is reported
/// as [`CommandOutcome::Failed`](crate::coordinator::CommandOutcome::Failed).
///
/// # Examples
///
/// ```
/// use swiftdeps::error::CoordinationError;
///
/// let error = CoordinationError::UnknownCommand("swift.cleanBuild".into());
/// assert_eq!(error.to_string(), "unknown command: swift.cleanBuild");
/// ```
#[derive(Error, Debug)]
pub enum CoordinationError {
    /// The folder's gate is held and admission is `reject`. Always wraps
    /// [`TaskError::Conflict`].
    #[error(transparent)]
    Conflict(TaskError),

    #[error("no workspace folder is active")]
    NoActiveFolder,

    #[error("{} is not a workspace folder", .0.display())]
    UnknownFolder(PathBuf),

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("{command} requires a {argument} argument")]
    MissingArgument {
        command: String,
        argument: &'static str,
    },

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Task(TaskError),

    #[error("failed to read dependency state: {0}")]
    Snapshot(#[from] CoreError),

    #[error("invalid configuration in {}: {source}", .path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<TaskError> for CoordinationError {
    fn from(error: TaskError) -> Self {
        match error {
            conflict @ TaskError::Conflict { .. } => Self::Conflict(conflict),
            other => Self::Task(other),
        }
    }
}

/// Convenience type alias for `Result<T, CoordinationError>`.
pub type Result<T> = std::result::Result<T, CoordinationError>;
