//! Command identifiers and dispatch.
//!
//! Commands always target the focused workspace folder and report a plain
//! `bool`: `Ok(true)` if the tool succeeded, `Ok(false)` if it failed, was
//! cancelled or the user dismissed a prompt, and `Err` if the command could
//! not be attempted.

use crate::coordinator::DependencyCoordinator;
use crate::error::{CoordinationError, Result};
use async_trait::async_trait;
use std::path::PathBuf;

pub const UPDATE_DEPENDENCIES: &str = "swift.updateDependencies";
pub const RESOLVE_DEPENDENCIES: &str = "swift.resolveDependencies";
pub const USE_LOCAL_DEPENDENCY: &str = "swift.useLocalDependency";
pub const EDIT_DEPENDENCY: &str = "swift.editDependency";
pub const UNEDIT_DEPENDENCY: &str = "swift.uneditDependency";
pub const RESET_PACKAGE: &str = "swift.resetPackage";

/// A dependency command with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    UpdateDependencies,
    ResolveDependencies,
    /// `path` is asked from a [`LocalPathPicker`] when absent.
    UseLocalDependency {
        name: String,
        path: Option<PathBuf>,
    },
    EditDependency {
        name: String,
    },
    UneditDependency {
        name: String,
    },
    ResetPackage,
}

impl Command {
    /// Builds a command from its identifier and positional arguments.
    ///
    /// # Examples
    ///
    /// ```
    /// use swiftdeps::commands::Command;
    ///
    /// let args = vec!["swift-markdown".to_string()];
    /// let command = Command::parse("swift.uneditDependency", &args).unwrap();
    ///
    /// assert_eq!(command, Command::UneditDependency { name: "swift-markdown".into() });
    /// assert!(Command::parse("swift.uneditDependency", &[]).is_err());
    /// ```
    pub fn parse(id: &str, args: &[String]) -> Result<Self> {
        let dependency = || {
            args.first()
                .cloned()
                .ok_or_else(|| CoordinationError::MissingArgument {
                    command: id.to_string(),
                    argument: "dependency",
                })
        };

        match id {
            UPDATE_DEPENDENCIES => Ok(Self::UpdateDependencies),
            RESOLVE_DEPENDENCIES => Ok(Self::ResolveDependencies),
            USE_LOCAL_DEPENDENCY => Ok(Self::UseLocalDependency {
                name: dependency()?,
                path: args.get(1).map(PathBuf::from),
            }),
            EDIT_DEPENDENCY => Ok(Self::EditDependency { name: dependency()? }),
            UNEDIT_DEPENDENCY => Ok(Self::UneditDependency { name: dependency()? }),
            RESET_PACKAGE => Ok(Self::ResetPackage),
            other => Err(CoordinationError::UnknownCommand(other.to_string())),
        }
    }

    pub fn id(&self) -> &'static str {
        match self {
            Self::UpdateDependencies => UPDATE_DEPENDENCIES,
            Self::ResolveDependencies => RESOLVE_DEPENDENCIES,
            Self::UseLocalDependency { .. } => USE_LOCAL_DEPENDENCY,
            Self::EditDependency { .. } => EDIT_DEPENDENCY,
            Self::UneditDependency { .. } => UNEDIT_DEPENDENCY,
            Self::ResetPackage => RESET_PACKAGE,
        }
    }
}

/// Asks the user for the local directory of a dependency.
#[async_trait]
pub trait LocalPathPicker: Send + Sync {
    /// `None` means the user dismissed the prompt.
    async fn pick_directory(&self, dependency: &str) -> Option<PathBuf>;
}

/// A picker that is always dismissed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPicker;

#[async_trait]
impl LocalPathPicker for NoPicker {
    async fn pick_directory(&self, _dependency: &str) -> Option<PathBuf> {
        None
    }
}

/// Runs a command against the focused folder.
pub async fn execute(
    coordinator: &DependencyCoordinator,
    command: Command,
    picker: &dyn LocalPathPicker,
) -> Result<bool> {
    let folder = coordinator.workspace().current_folder().await?;
    tracing::debug!(command = command.id(), folder = %folder.root().display(), "executing");

    let outcome = match command {
        Command::UpdateDependencies => coordinator.update_dependencies(&folder).await?,
        Command::ResolveDependencies => coordinator.resolve_dependencies(&folder).await?,
        Command::UseLocalDependency { name, path } => {
            let path = match path {
                Some(path) => path,
                None => match picker.pick_directory(&name).await {
                    Some(path) => path,
                    None => {
                        tracing::info!(dependency = %name, "no local directory selected");
                        return Ok(false);
                    }
                },
            };
            coordinator
                .use_local_dependency(&folder, &name, &path)
                .await?
        }
        Command::EditDependency { name } => coordinator.edit_dependency(&folder, &name).await?,
        Command::UneditDependency { name } => {
            coordinator.unedit_dependency(&folder, &name).await?
        }
        Command::ResetPackage => coordinator.reset_package(&folder).await?,
    };
    Ok(outcome.into())
}

/// Parses and runs a command by identifier.
pub async fn execute_by_id(
    coordinator: &DependencyCoordinator,
    id: &str,
    args: &[String],
    picker: &dyn LocalPathPicker,
) -> Result<bool> {
    execute(coordinator, Command::parse(id, args)?, picker).await
}
