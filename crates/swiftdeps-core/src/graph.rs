//! Dependency graph state machine.
//!
//! Each dependency of a package is in one of four states:
//!
//! ```text
//!            update / resolve                 success
//!   Locked ─────────────────────> Resolving ───────────> Locked
//!     │                                │ failure
//!     │ use-local(path) / edit          └──────────────> prior state
//!     v
//!   Edited(path) ──── reset / unedit ───> Missing ── resolve ──> Locked | removed
//! ```
//!
//! Edit-mode changes only take effect once a later resolve succeeds; until
//! then the node carries `pending_resolve`. Every transition hands back a
//! [`Checkpoint`], so a failed tool invocation can restore the exact prior
//! graph.

use crate::lockfile::{DependencySnapshot, PinnedPackage, parse_version};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Resolution state of one dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyState {
    /// Pinned to a remote source in the lock file.
    Locked,
    /// A resolve or update is in flight.
    Resolving,
    /// Sources come from a local directory instead of the pinned remote.
    Edited(PathBuf),
    /// Declared but currently without a usable source.
    Missing,
}

impl fmt::Display for DependencyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Locked => f.write_str("locked"),
            Self::Resolving => f.write_str("resolving"),
            Self::Edited(path) => write!(f, "edited ({})", path.display()),
            Self::Missing => f.write_str("missing"),
        }
    }
}

/// One dependency of a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyNode {
    /// Package identity, unique within a folder.
    pub name: String,
    pub state: DependencyState,
    pub location: Option<String>,
    pub version: Option<String>,
    /// The last edit-mode change has not been confirmed by a resolve yet.
    pub pending_resolve: bool,
}

impl DependencyNode {
    pub fn locked(pin: &PinnedPackage) -> Self {
        Self {
            name: pin.identity.clone(),
            state: DependencyState::Locked,
            location: Some(pin.location.clone()),
            version: Some(pin.describe()).filter(|v| !v.is_empty()),
            pending_resolve: false,
        }
    }

    pub fn edited(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            state: DependencyState::Edited(path.into()),
            location: None,
            version: None,
            pending_resolve: false,
        }
    }

    /// Local override directory, present only in edit mode.
    pub fn local_path(&self) -> Option<&Path> {
        match &self.state {
            DependencyState::Edited(path) => Some(path),
            _ => None,
        }
    }

    pub fn is_edited(&self) -> bool {
        matches!(self.state, DependencyState::Edited(_))
    }

    /// True if the build can currently use this dependency.
    pub fn is_available(&self) -> bool {
        !self.pending_resolve
            && matches!(
                self.state,
                DependencyState::Locked | DependencyState::Edited(_)
            )
    }
}

/// Rejected state transition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("dependency '{0}' is not part of the package graph")]
    UnknownDependency(String),

    #[error("cannot {operation} '{name}' while it is {state}")]
    InvalidTransition {
        name: String,
        state: String,
        operation: &'static str,
    },

    #[error("cannot {operation} while dependencies are resolving")]
    Busy { operation: &'static str },
}

/// Saved graph used to undo a transition.
#[derive(Debug, Clone)]
#[must_use = "a checkpoint is the only way to roll a failed transition back"]
pub struct Checkpoint {
    nodes: BTreeMap<String, DependencyNode>,
}

/// Differences applied by a reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    /// `(name, from, to)` for pins that moved to a newer version, or to a
    /// different branch or revision.
    pub upgraded: Vec<(String, String, String)>,
    /// `(name, from, to)` for pins that moved to an older semver version.
    pub downgraded: Vec<(String, String, String)>,
}

impl ReconcileReport {
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.upgraded.is_empty()
            && self.downgraded.is_empty()
    }
}

/// Dependency graph of one package folder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    nodes: BTreeMap<String, DependencyNode>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a graph that mirrors a snapshot: edited dependencies first,
    /// everything else pinned.
    pub fn from_snapshot(snapshot: &DependencySnapshot) -> Self {
        let mut graph = Self::new();
        graph.reconcile(snapshot);
        graph
    }

    pub fn get(&self, name: &str) -> Option<&DependencyNode> {
        self.nodes.get(name)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &DependencyNode> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// True if any node waits for a resolve to take effect.
    pub fn needs_resolve(&self) -> bool {
        self.nodes.values().any(|node| node.pending_resolve)
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            nodes: self.nodes.clone(),
        }
    }

    pub fn rollback(&mut self, checkpoint: Checkpoint) {
        self.nodes = checkpoint.nodes;
    }

    fn ensure_not_resolving(&self, operation: &'static str) -> Result<(), TransitionError> {
        if self
            .nodes
            .values()
            .any(|node| node.state == DependencyState::Resolving)
        {
            return Err(TransitionError::Busy { operation });
        }
        Ok(())
    }

    fn node_mut(&mut self, name: &str) -> Result<&mut DependencyNode, TransitionError> {
        self.nodes
            .get_mut(name)
            .ok_or_else(|| TransitionError::UnknownDependency(name.to_string()))
    }

    /// Starts a resolve or update: locked and missing nodes become `Resolving`.
    ///
    /// Edited nodes keep their state; resolution honors the local override.
    pub fn begin_resolve(&mut self) -> Result<Checkpoint, TransitionError> {
        self.ensure_not_resolving("resolve")?;
        let checkpoint = self.checkpoint();
        for node in self.nodes.values_mut() {
            if matches!(node.state, DependencyState::Locked | DependencyState::Missing) {
                node.state = DependencyState::Resolving;
            }
        }
        Ok(checkpoint)
    }

    /// Completes a successful resolve against what the tool recorded.
    pub fn complete_resolve(&mut self, snapshot: &DependencySnapshot) -> ReconcileReport {
        self.reconcile(snapshot)
    }

    /// Puts a locked dependency into edit mode.
    ///
    /// The override only becomes effective after the next successful resolve.
    pub fn mark_edited(
        &mut self,
        name: &str,
        path: impl Into<PathBuf>,
    ) -> Result<Checkpoint, TransitionError> {
        self.ensure_not_resolving("edit")?;
        let checkpoint = self.checkpoint();
        let node = self.node_mut(name)?;
        if node.state != DependencyState::Locked {
            return Err(TransitionError::InvalidTransition {
                name: name.to_string(),
                state: node.state.to_string(),
                operation: "edit",
            });
        }
        node.state = DependencyState::Edited(path.into());
        node.pending_resolve = true;
        Ok(checkpoint)
    }

    /// Takes a dependency out of edit mode.
    ///
    /// The node is `Missing` until a resolve finds a remote source again.
    pub fn mark_unedited(&mut self, name: &str) -> Result<Checkpoint, TransitionError> {
        self.ensure_not_resolving("unedit")?;
        let checkpoint = self.checkpoint();
        let node = self.node_mut(name)?;
        if !node.is_edited() {
            return Err(TransitionError::InvalidTransition {
                name: name.to_string(),
                state: node.state.to_string(),
                operation: "unedit",
            });
        }
        node.state = DependencyState::Missing;
        node.pending_resolve = true;
        Ok(checkpoint)
    }

    /// Discards every local override and checkout.
    ///
    /// Edited nodes become `Missing`; locked nodes keep their pin but need a
    /// resolve to be checked out again.
    pub fn reset(&mut self) -> Result<Checkpoint, TransitionError> {
        self.ensure_not_resolving("reset")?;
        let checkpoint = self.checkpoint();
        for node in self.nodes.values_mut() {
            if node.is_edited() {
                node.state = DependencyState::Missing;
            }
            node.pending_resolve = true;
        }
        Ok(checkpoint)
    }

    /// Makes the graph match a snapshot.
    ///
    /// Edited entries win over pins; nodes the snapshot knows nothing about
    /// disappear from the graph.
    fn reconcile(&mut self, snapshot: &DependencySnapshot) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let mut next = BTreeMap::new();

        for (name, path) in snapshot.edited() {
            let mut node = DependencyNode::edited(name, path);
            if let Some(pin) = snapshot.pin(name) {
                node.location = Some(pin.location.clone());
                node.version = Some(pin.describe()).filter(|v| !v.is_empty());
            }
            next.insert(name.to_string(), node);
        }

        for pin in snapshot.pins() {
            if next.contains_key(&pin.identity) {
                continue;
            }
            let node = DependencyNode::locked(pin);
            if let Some(previous) = self.nodes.get(&pin.identity)
                && let (Some(from), Some(to)) = (&previous.version, &node.version)
                && from != to
            {
                let change = (pin.identity.clone(), from.clone(), to.clone());
                match (parse_version(from), pin.semver()) {
                    (Some(old), Some(new)) if new < old => report.downgraded.push(change),
                    _ => report.upgraded.push(change),
                }
            }
            next.insert(pin.identity.clone(), node);
        }

        report.added = next
            .keys()
            .filter(|name| !self.nodes.contains_key(*name))
            .cloned()
            .collect();
        report.removed = self
            .nodes
            .keys()
            .filter(|name| !next.contains_key(*name))
            .cloned()
            .collect();

        self.nodes = next;
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pin(identity: &str, version: &str) -> PinnedPackage {
        PinnedPackage {
            identity: identity.into(),
            location: format!("https://github.com/apple/{identity}.git"),
            version: Some(version.into()),
            revision: None,
            branch: None,
        }
    }

    fn locked_graph() -> DependencyGraph {
        DependencyGraph::from_snapshot(
            &DependencySnapshot::new()
                .with_pin(pin("swift-markdown", "0.2.0"))
                .with_pin(pin("swift-cmark", "0.2.0")),
        )
    }

    #[test]
    fn test_from_snapshot_locks_pins() {
        let graph = locked_graph();
        assert_eq!(graph.len(), 2);
        let node = graph.get("swift-markdown").unwrap();
        assert_eq!(node.state, DependencyState::Locked);
        assert_eq!(node.version.as_deref(), Some("0.2.0"));
        assert!(node.is_available());
        assert!(!graph.needs_resolve());
    }

    #[test]
    fn test_resolve_is_idempotent_on_locked_graph() {
        let mut graph = locked_graph();
        let before = graph.clone();
        let snapshot = DependencySnapshot::new()
            .with_pin(pin("swift-markdown", "0.2.0"))
            .with_pin(pin("swift-cmark", "0.2.0"));

        for _ in 0..2 {
            let _checkpoint = graph.begin_resolve().unwrap();
            assert_eq!(
                graph.get("swift-markdown").unwrap().state,
                DependencyState::Resolving
            );
            let report = graph.complete_resolve(&snapshot);
            assert!(report.is_unchanged());
            assert_eq!(graph, before);
        }
    }

    #[test]
    fn test_failed_resolve_rolls_back() {
        let mut graph = locked_graph();
        let before = graph.clone();

        let checkpoint = graph.begin_resolve().unwrap();
        graph.rollback(checkpoint);

        assert_eq!(graph, before);
    }

    #[test]
    fn test_concurrent_transition_is_busy() {
        let mut graph = locked_graph();
        let _checkpoint = graph.begin_resolve().unwrap();

        assert_eq!(
            graph.begin_resolve().unwrap_err(),
            TransitionError::Busy {
                operation: "resolve"
            }
        );
        assert!(matches!(
            graph.mark_edited("swift-markdown", "/src/Swift-Markdown"),
            Err(TransitionError::Busy { .. })
        ));
    }

    #[test]
    fn test_update_reports_upgrades() {
        let mut graph = locked_graph();
        let _checkpoint = graph.begin_resolve().unwrap();
        let report = graph.complete_resolve(
            &DependencySnapshot::new()
                .with_pin(pin("swift-markdown", "0.3.0"))
                .with_pin(pin("swift-cmark", "0.2.0")),
        );
        assert_eq!(
            report.upgraded,
            vec![(
                "swift-markdown".to_string(),
                "0.2.0".to_string(),
                "0.3.0".to_string()
            )]
        );
        assert!(report.downgraded.is_empty());
        assert_eq!(
            graph.get("swift-markdown").unwrap().version.as_deref(),
            Some("0.3.0")
        );
    }

    #[test]
    fn test_versions_are_ordered_as_semver() {
        let mut graph = DependencyGraph::from_snapshot(
            &DependencySnapshot::new()
                .with_pin(pin("swift-markdown", "0.10.0"))
                .with_pin(pin("swift-cmark", "0.2.0")),
        );
        let _checkpoint = graph.begin_resolve().unwrap();
        let report = graph.complete_resolve(
            &DependencySnapshot::new()
                .with_pin(pin("swift-markdown", "0.9.1"))
                .with_pin(pin("swift-cmark", "0.10.0")),
        );

        // A string comparison would get both of these backwards.
        assert_eq!(
            report.downgraded,
            vec![(
                "swift-markdown".to_string(),
                "0.10.0".to_string(),
                "0.9.1".to_string()
            )]
        );
        assert_eq!(
            report.upgraded,
            vec![(
                "swift-cmark".to_string(),
                "0.2.0".to_string(),
                "0.10.0".to_string()
            )]
        );
        assert!(!report.is_unchanged());
    }

    #[test]
    fn test_edit_requires_resolve_to_take_effect() {
        let mut graph = locked_graph();
        let _checkpoint = graph
            .mark_edited("swift-markdown", "/src/Swift-Markdown")
            .unwrap();

        let node = graph.get("swift-markdown").unwrap();
        assert_eq!(node.local_path(), Some(Path::new("/src/Swift-Markdown")));
        assert!(node.pending_resolve);
        assert!(!node.is_available());
        assert!(graph.needs_resolve());

        let _checkpoint = graph.begin_resolve().unwrap();
        // Edited nodes are not re-resolved against the remote.
        assert!(graph.get("swift-markdown").unwrap().is_edited());
        graph.complete_resolve(
            &DependencySnapshot::new()
                .with_pin(pin("swift-markdown", "0.2.0"))
                .with_pin(pin("swift-cmark", "0.2.0"))
                .with_edited("swift-markdown", "/src/Swift-Markdown"),
        );

        let node = graph.get("swift-markdown").unwrap();
        assert!(node.is_edited());
        assert!(node.is_available());
        assert!(!graph.needs_resolve());
    }

    #[test]
    fn test_edit_of_edited_dependency_is_rejected() {
        let mut graph = locked_graph();
        let _checkpoint = graph.mark_edited("swift-markdown", "/src/a").unwrap();
        let err = graph.mark_edited("swift-markdown", "/src/b").unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot edit 'swift-markdown' while it is edited (/src/a)"
        );
    }

    #[test]
    fn test_unknown_dependency() {
        let mut graph = locked_graph();
        assert_eq!(
            graph.mark_edited("swift-syntax", "/src").unwrap_err(),
            TransitionError::UnknownDependency("swift-syntax".into())
        );
        assert!(matches!(
            graph.mark_unedited("swift-syntax"),
            Err(TransitionError::UnknownDependency(_))
        ));
    }

    #[test]
    fn test_unedit_requires_edit_mode() {
        let mut graph = locked_graph();
        let err = graph.mark_unedited("swift-markdown").unwrap_err();
        assert!(matches!(
            err,
            TransitionError::InvalidTransition {
                operation: "unedit",
                ..
            }
        ));
    }

    #[test]
    fn test_unedit_then_resolve_relocks_remote() {
        let mut graph = locked_graph();
        let _checkpoint = graph.mark_edited("swift-markdown", "/src/Swift-Markdown").unwrap();

        let _checkpoint = graph.mark_unedited("swift-markdown").unwrap();
        let node = graph.get("swift-markdown").unwrap();
        assert_eq!(node.state, DependencyState::Missing);
        assert!(node.local_path().is_none());
        assert!(!node.is_available());

        let _checkpoint = graph.begin_resolve().unwrap();
        graph.complete_resolve(
            &DependencySnapshot::new()
                .with_pin(pin("swift-markdown", "0.2.0"))
                .with_pin(pin("swift-cmark", "0.2.0")),
        );
        assert_eq!(
            graph.get("swift-markdown").unwrap().state,
            DependencyState::Locked
        );
    }

    #[test]
    fn test_missing_dependency_without_pin_disappears() {
        let mut graph = locked_graph();
        let _checkpoint = graph.mark_edited("swift-markdown", "/src/Swift-Markdown").unwrap();
        let _checkpoint = graph.reset().unwrap();

        assert_eq!(
            graph.get("swift-markdown").unwrap().state,
            DependencyState::Missing
        );
        assert!(graph.get("swift-cmark").unwrap().pending_resolve);

        let _checkpoint = graph.begin_resolve().unwrap();
        let report = graph.complete_resolve(
            &DependencySnapshot::new().with_pin(pin("swift-cmark", "0.2.0")),
        );

        assert!(graph.get("swift-markdown").is_none());
        assert_eq!(report.removed, vec!["swift-markdown".to_string()]);
        assert!(!graph.needs_resolve());
    }

    #[test]
    fn test_failed_reset_restores_edit_mode() {
        let mut graph = locked_graph();
        let _checkpoint = graph.mark_edited("swift-markdown", "/src/Swift-Markdown").unwrap();
        let edited = graph.clone();

        let checkpoint = graph.reset().unwrap();
        graph.rollback(checkpoint);

        assert_eq!(graph, edited);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(DependencyState::Locked.to_string(), "locked");
        assert_eq!(DependencyState::Missing.to_string(), "missing");
        assert_eq!(
            DependencyState::Edited(PathBuf::from("/src/pkg")).to_string(),
            "edited (/src/pkg)"
        );
    }
}
