//! On-disk dependency state written by the package manager.
//!
//! Two files describe a folder's dependencies after resolution:
//!
//! - `Package.resolved`: pinned remote packages (the lock file);
//! - `<scratch>/workspace-state.json`: managed checkouts, including the
//!   dependencies currently in edit mode.
//!
//! Both are owned by the package manager. This module only ever reads them
//! and folds them into a [`DependencySnapshot`].
//!
//! # Package.resolved formats
//!
//! ```text
//! v1: {"object": {"pins": [{"package", "repositoryURL", "state"}]}, "version": 1}
//! v2: {"pins": [{"identity", "kind", "location", "state"}], "version": 2}
//! v3: v2 plus "originHash"
//! ```

use crate::error::{CoreError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Lock file name, relative to the package root.
pub const RESOLVED_FILE: &str = "Package.resolved";

/// Workspace state file name, relative to the scratch directory.
pub const WORKSPACE_STATE_FILE: &str = "workspace-state.json";

/// Default scratch directory, relative to the package root.
pub const DEFAULT_SCRATCH_DIR: &str = ".build";

/// Directory holding checkouts of dependencies edited without `--path`.
pub const EDITS_DIR: &str = "Packages";

/// Parses a pinned version string as semver.
///
/// Branch and revision pins, and tags that are not semver, yield `None`.
pub fn parse_version(version: &str) -> Option<semver::Version> {
    semver::Version::parse(version.strip_prefix('v').unwrap_or(version)).ok()
}

/// A remote package pinned in `Package.resolved`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinnedPackage {
    /// Package identity (lowercased last path component of the location).
    pub identity: String,
    pub location: String,
    pub version: Option<String>,
    pub revision: Option<String>,
    pub branch: Option<String>,
}

impl PinnedPackage {
    /// Parses the pinned version as semver, if it has one.
    pub fn semver(&self) -> Option<semver::Version> {
        self.version.as_deref().and_then(parse_version)
    }

    /// Short description of what the pin points at: version, branch, or revision.
    pub fn describe(&self) -> String {
        if let Some(version) = &self.version {
            return version.clone();
        }
        if let Some(branch) = &self.branch {
            return branch.clone();
        }
        self.revision
            .as_deref()
            .map(|rev| rev.chars().take(7).collect())
            .unwrap_or_default()
    }
}

/// Resolved dependency state of one package at one point in time.
///
/// # Examples
///
/// ```
/// use swiftdeps_core::lockfile::{DependencySnapshot, PinnedPackage};
///
/// let snapshot = DependencySnapshot::new()
///     .with_pin(PinnedPackage {
///         identity: "swift-markdown".into(),
///         location: "https://github.com/apple/swift-markdown.git".into(),
///         version: Some("0.2.0".into()),
///         revision: None,
///         branch: None,
///     })
///     .with_edited("swift-markdown", "/src/Swift-Markdown");
///
/// assert!(snapshot.pin("swift-markdown").is_some());
/// assert!(snapshot.edited_path("swift-markdown").is_some());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencySnapshot {
    pins: BTreeMap<String, PinnedPackage>,
    edited: BTreeMap<String, PathBuf>,
}

impl DependencySnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_pin(mut self, pin: PinnedPackage) -> Self {
        self.insert_pin(pin);
        self
    }

    #[must_use]
    pub fn with_edited(mut self, identity: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.insert_edited(identity, path);
        self
    }

    pub fn insert_pin(&mut self, pin: PinnedPackage) {
        self.pins.insert(pin.identity.clone(), pin);
    }

    pub fn insert_edited(&mut self, identity: impl Into<String>, path: impl Into<PathBuf>) {
        self.edited.insert(identity.into(), path.into());
    }

    pub fn pin(&self, identity: &str) -> Option<&PinnedPackage> {
        self.pins.get(identity)
    }

    pub fn edited_path(&self, identity: &str) -> Option<&Path> {
        self.edited.get(identity).map(PathBuf::as_path)
    }

    pub fn pins(&self) -> impl Iterator<Item = &PinnedPackage> {
        self.pins.values()
    }

    pub fn edited(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.edited
            .iter()
            .map(|(name, path)| (name.as_str(), path.as_path()))
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty() && self.edited.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct FormatHeader {
    version: u64,
}

#[derive(Debug, Deserialize)]
struct ResolvedV1 {
    object: ResolvedV1Object,
}

#[derive(Debug, Deserialize)]
struct ResolvedV1Object {
    #[serde(default)]
    pins: Vec<PinV1>,
}

#[derive(Debug, Deserialize)]
struct PinV1 {
    #[serde(rename = "repositoryURL")]
    repository_url: String,
    state: PinState,
}

#[derive(Debug, Deserialize)]
struct ResolvedV2 {
    #[serde(default)]
    pins: Vec<PinV2>,
}

#[derive(Debug, Deserialize)]
struct PinV2 {
    identity: String,
    location: String,
    state: PinState,
}

#[derive(Debug, Default, Deserialize)]
struct PinState {
    revision: Option<String>,
    version: Option<String>,
    branch: Option<String>,
}

/// Derives a package identity from its location, the way SwiftPM does for
/// v1 lock files: last path component, `.git` stripped, lowercased.
pub fn identity_from_location(location: &str) -> String {
    let trimmed = location.trim_end_matches('/');
    let last = trimmed.rsplit(['/', ':']).next().unwrap_or(trimmed);
    last.strip_suffix(".git").unwrap_or(last).to_lowercase()
}

/// Parses the content of a `Package.resolved` file.
pub fn parse_package_resolved(content: &str) -> Result<Vec<PinnedPackage>> {
    let parse_error = |e: serde_json::Error| CoreError::ParseError {
        file_type: RESOLVED_FILE.into(),
        source: Box::new(e),
    };

    let header: FormatHeader = serde_json::from_str(content).map_err(parse_error)?;
    match header.version {
        1 => {
            let resolved: ResolvedV1 = serde_json::from_str(content).map_err(parse_error)?;
            Ok(resolved
                .object
                .pins
                .into_iter()
                .map(|pin| PinnedPackage {
                    identity: identity_from_location(&pin.repository_url),
                    location: pin.repository_url,
                    version: pin.state.version,
                    revision: pin.state.revision,
                    branch: pin.state.branch,
                })
                .collect())
        }
        2 | 3 => {
            let resolved: ResolvedV2 = serde_json::from_str(content).map_err(parse_error)?;
            Ok(resolved
                .pins
                .into_iter()
                .map(|pin| PinnedPackage {
                    identity: pin.identity,
                    location: pin.location,
                    version: pin.state.version,
                    revision: pin.state.revision,
                    branch: pin.state.branch,
                })
                .collect())
        }
        version => Err(CoreError::UnsupportedFormat {
            file_type: RESOLVED_FILE.into(),
            version,
        }),
    }
}

#[derive(Debug, Deserialize)]
struct WorkspaceState {
    object: WorkspaceStateObject,
}

#[derive(Debug, Deserialize)]
struct WorkspaceStateObject {
    #[serde(default)]
    dependencies: Vec<ManagedDependency>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManagedDependency {
    package_ref: PackageRef,
    state: ManagedState,
    subpath: String,
}

#[derive(Debug, Deserialize)]
struct PackageRef {
    identity: String,
}

#[derive(Debug, Deserialize)]
struct ManagedState {
    name: String,
    path: Option<PathBuf>,
}

/// Parses `workspace-state.json` and returns the dependencies in edit mode
/// with the directory their sources are taken from.
///
/// Dependencies edited without an explicit path live under
/// `<package_root>/Packages/<subpath>`.
pub fn parse_edited_dependencies(
    content: &str,
    package_root: &Path,
) -> Result<BTreeMap<String, PathBuf>> {
    let state: WorkspaceState =
        serde_json::from_str(content).map_err(|e| CoreError::ParseError {
            file_type: WORKSPACE_STATE_FILE.into(),
            source: Box::new(e),
        })?;

    Ok(state
        .object
        .dependencies
        .into_iter()
        .filter(|dep| dep.state.name == "edited")
        .map(|dep| {
            let path = dep
                .state
                .path
                .unwrap_or_else(|| package_root.join(EDITS_DIR).join(&dep.subpath));
            (dep.package_ref.identity, path)
        })
        .collect())
}

/// Source of dependency snapshots for a package folder.
///
/// The coordinator reloads a snapshot after every successful resolution so
/// the graph follows what the package manager actually recorded.
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    async fn load(&self, package_root: &Path) -> Result<DependencySnapshot>;
}

/// Reads snapshots from `Package.resolved` and `workspace-state.json`.
///
/// Missing files are treated as empty: a package that was never resolved has
/// no pins and no edits.
#[derive(Debug, Clone, Default)]
pub struct FileSnapshotProvider {
    scratch_path: Option<PathBuf>,
}

impl FileSnapshotProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a custom scratch directory (`--scratch-path`) instead of `.build`.
    pub fn with_scratch_path(scratch_path: impl Into<PathBuf>) -> Self {
        Self {
            scratch_path: Some(scratch_path.into()),
        }
    }

    fn workspace_state_path(&self, package_root: &Path) -> PathBuf {
        let scratch = match &self.scratch_path {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => package_root.join(path),
            None => package_root.join(DEFAULT_SCRATCH_DIR),
        };
        scratch.join(WORKSPACE_STATE_FILE)
    }
}

async fn read_optional(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl SnapshotProvider for FileSnapshotProvider {
    async fn load(&self, package_root: &Path) -> Result<DependencySnapshot> {
        let mut snapshot = DependencySnapshot::new();

        let resolved_path = package_root.join(RESOLVED_FILE);
        if let Some(content) = read_optional(&resolved_path).await? {
            for pin in parse_package_resolved(&content)? {
                snapshot.insert_pin(pin);
            }
        } else {
            tracing::debug!("No {} at {}", RESOLVED_FILE, resolved_path.display());
        }

        let state_path = self.workspace_state_path(package_root);
        if let Some(content) = read_optional(&state_path).await? {
            for (identity, path) in parse_edited_dependencies(&content, package_root)? {
                snapshot.insert_edited(identity, path);
            }
        }

        tracing::debug!(
            pins = snapshot.pins.len(),
            edited = snapshot.edited.len(),
            "Loaded dependency snapshot for {}",
            package_root.display()
        );
        Ok(snapshot)
    }
}
