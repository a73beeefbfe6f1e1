//! Dependency workflow coordinator for Swift packages.
//!
//! Wraps `swift package` dependency operations (resolve, update, edit,
//! unedit, reset) and `swift build` behind a per-folder task gate, so that no
//! two tasks ever touch a package's manifest and lock file at the same time.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use swiftdeps::commands::{self, Command, NoPicker};
//! use swiftdeps::config::WorkflowConfig;
//! use swiftdeps::coordinator::DependencyCoordinator;
//! use swiftdeps::workspace::WorkspaceContext;
//!
//! # async fn example() -> swiftdeps::Result<()> {
//! let workspace = Arc::new(WorkspaceContext::new(WorkflowConfig::default()));
//! workspace.focus_folder("/work/MyPackage").await?;
//!
//! let coordinator = DependencyCoordinator::new(workspace);
//! let resolved = commands::execute(&coordinator, Command::ResolveDependencies, &NoPicker).await?;
//! assert!(resolved);
//! # Ok(())
//! # }
//! ```

pub mod commands;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod folder;
pub mod progress;
pub mod workspace;

// Re-export commonly used types
pub use coordinator::{CommandOutcome, DependencyCoordinator, ToolOutput};
pub use error::{CoordinationError, Result};
pub use folder::FolderContext;
pub use workspace::WorkspaceContext;
