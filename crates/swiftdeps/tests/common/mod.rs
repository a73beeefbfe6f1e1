//! Common test utilities for integration tests.
//!
//! Provides [`FakeSwiftPm`], a deterministic stand-in for the `swift`
//! executable that models one package, `defaultpackage`, whose target needs
//! the product `PackageLib`:
//!
//! - the remote `swift-markdown` dependency does not provide `PackageLib`,
//!   so building against it fails with a "required" diagnostic;
//! - the local `Swift-Markdown` checkout does, so once it is edited in and
//!   resolved the build succeeds with an "unused dependency" warning.
//!
//! The fake records every invocation with timestamps, so tests can check
//! ordering and overlap.

#![allow(dead_code)] // Not every test binary uses every helper

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use swiftdeps::config::WorkflowConfig;
use swiftdeps::coordinator::DependencyCoordinator;
use swiftdeps::workspace::WorkspaceContext;
use swiftdeps_core::{
    CancelHandle, DependencySnapshot, Invocation, PinnedPackage, ProcessOutput, ProcessRunner,
    SnapshotProvider, TaskError,
};

pub(crate) const DEPENDENCY: &str = "swift-markdown";
pub(crate) const TRANSITIVE: &str = "swift-cmark";
pub(crate) const PRODUCT: &str = "PackageLib";
pub(crate) const PACKAGE: &str = "defaultpackage";

pub(crate) const MISSING_PRODUCT_OUTPUT: &str = "\
Building for debugging...
error: 'defaultpackage': product 'PackageLib' required by package 'defaultpackage' target 'defaultpackage' not found.
";

pub(crate) const SUCCESSFUL_BUILD_OUTPUT: &str = "\
warning: 'defaultpackage': dependency 'swift-markdown' is not used by any target
Building for debugging...
[3/3] Compiling defaultpackage main.swift
Build complete! (0.42s)
";

/// Platform skips for a test, checked against `std::env::consts::OS`.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct TestConfig {
    pub skip_on_platform: &'static [&'static str],
}

impl TestConfig {
    pub(crate) fn should_skip(&self) -> bool {
        let skip = self.skip_on_platform.contains(&std::env::consts::OS);
        if skip {
            eprintln!("skipped on {}", std::env::consts::OS);
        }
        skip
    }
}

/// One invocation seen by the fake.
#[derive(Debug, Clone)]
pub(crate) struct Execution {
    pub folder: PathBuf,
    pub args: Vec<String>,
    pub started_at: Instant,
    pub finished_at: Instant,
    pub cancelled: bool,
}

impl Execution {
    /// The `swift` subcommand, e.g. `resolve` or `build`.
    pub(crate) fn subcommand(&self) -> &str {
        subcommand(&self.args)
    }

    pub(crate) fn overlaps(&self, other: &Self) -> bool {
        self.started_at < other.finished_at && other.started_at < self.finished_at
    }
}

/// Dependency state of one package folder as the fake tool sees it.
#[derive(Debug, Clone)]
struct PackageState {
    version: String,
    /// Edit recorded by `edit` but not yet resolved.
    pending_edit: Option<PathBuf>,
    /// Edit in effect for builds.
    edited: Option<PathBuf>,
    /// The edited checkout has local modifications.
    dirty: bool,
}

impl Default for PackageState {
    fn default() -> Self {
        Self {
            version: "0.2.0".into(),
            pending_edit: None,
            edited: None,
            dirty: false,
        }
    }
}

type Hook = Box<dyn FnOnce() + Send>;

struct Injected {
    subcommand: String,
    exit_code: i32,
    output: String,
}

/// Deterministic fake of the `swift` executable and its on-disk state.
pub(crate) struct FakeSwiftPm {
    packages: Mutex<HashMap<PathBuf, PackageState>>,
    /// Local directories that provide `PackageLib`.
    valid_local: HashSet<PathBuf>,
    latest_version: Mutex<String>,
    delay: Mutex<Duration>,
    failures: Mutex<Vec<Injected>>,
    executions: Mutex<Vec<Execution>>,
    hooks: Mutex<Vec<(String, Hook)>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl FakeSwiftPm {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            packages: Mutex::new(HashMap::new()),
            valid_local: HashSet::from([local_package()]),
            latest_version: Mutex::new("0.2.0".into()),
            delay: Mutex::new(Duration::ZERO),
            failures: Mutex::new(Vec::new()),
            executions: Mutex::new(Vec::new()),
            hooks: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        })
    }

    /// Makes every invocation take at least `delay`.
    pub(crate) fn set_delay(&self, delay: Duration) {
        *self.delay.lock().expect("delay lock") = delay;
    }

    /// Version `update` moves the dependency to.
    pub(crate) fn publish_version(&self, version: &str) {
        *self.latest_version.lock().expect("version lock") = version.to_string();
    }

    /// Makes the next invocation of `subcommand` fail.
    pub(crate) fn fail_next(&self, subcommand: &str, exit_code: i32, output: &str) {
        self.failures.lock().expect("failures lock").push(Injected {
            subcommand: subcommand.into(),
            exit_code,
            output: output.into(),
        });
    }

    /// Calls `hook` once the next invocation of `subcommand` has finished,
    /// before its result is handed back.
    pub(crate) fn after_next(&self, subcommand: &str, hook: impl FnOnce() + Send + 'static) {
        self.hooks
            .lock()
            .expect("hooks lock")
            .push((subcommand.into(), Box::new(hook)));
    }

    /// Marks the edited checkout of `folder` as locally modified.
    pub(crate) fn modify_checkout(&self, folder: &Path) {
        self.packages
            .lock()
            .expect("packages lock")
            .entry(folder.to_path_buf())
            .or_default()
            .dirty = true;
    }

    pub(crate) fn executions(&self) -> Vec<Execution> {
        self.executions.lock().expect("executions lock").clone()
    }

    pub(crate) fn executions_of(&self, subcommand: &str) -> Vec<Execution> {
        self.executions()
            .into_iter()
            .filter(|e| e.subcommand() == subcommand)
            .collect()
    }

    /// Highest number of invocations that were running at the same time.
    pub(crate) fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    fn take_failure(&self, subcommand: &str) -> Option<ProcessOutput> {
        let mut failures = self.failures.lock().expect("failures lock");
        let index = failures.iter().position(|f| f.subcommand == subcommand)?;
        let failure = failures.remove(index);
        Some(ProcessOutput::new(failure.exit_code, failure.output))
    }

    /// Applies one invocation to the package state.
    fn execute(&self, folder: &Path, args: &[String]) -> ProcessOutput {
        let words: Vec<&str> = args.iter().map(String::as_str).collect();
        let mut packages = self.packages.lock().expect("packages lock");
        let state = packages.entry(folder.to_path_buf()).or_default();

        match words.as_slice() {
            ["build", ..] => {
                let provides_product = state
                    .edited
                    .as_ref()
                    .is_some_and(|path| self.valid_local.contains(path));
                if provides_product {
                    ProcessOutput::new(0, SUCCESSFUL_BUILD_OUTPUT)
                } else {
                    ProcessOutput::new(1, MISSING_PRODUCT_OUTPUT)
                }
            }
            ["package", "resolve", ..] => {
                if let Some(path) = state.pending_edit.take() {
                    state.edited = Some(path);
                }
                ProcessOutput::new(0, "Everything is already up-to-date\n")
            }
            ["package", "update", ..] => {
                if let Some(path) = state.pending_edit.take() {
                    state.edited = Some(path);
                }
                let latest = self.latest_version.lock().expect("version lock").clone();
                let output = if latest == state.version {
                    "Everything is already up-to-date\n".to_string()
                } else {
                    format!(
                        "Updating https://github.com/apple/swift-markdown.git\n\
                         Updated https://github.com/apple/swift-markdown.git ({} -> {})\n",
                        state.version, latest
                    )
                };
                state.version = latest;
                ProcessOutput::new(0, output)
            }
            ["package", "edit", "--path", path, name, ..] => {
                if *name != DEPENDENCY {
                    return unknown_dependency(name);
                }
                state.pending_edit = Some(PathBuf::from(path));
                ProcessOutput::new(0, "")
            }
            ["package", "edit", name, ..] => {
                if *name != DEPENDENCY {
                    return unknown_dependency(name);
                }
                state.pending_edit = Some(folder.join("Packages").join(name));
                ProcessOutput::new(
                    0,
                    format!("Creating working copy of package '{}'\n", name),
                )
            }
            ["package", "unedit", rest @ ..] => {
                let force = rest.contains(&"--force");
                if state.dirty && !force {
                    return ProcessOutput::new(
                        1,
                        format!(
                            "error: dependency '{}' has uncommitted changes; \
                             use --force to discard them\n",
                            DEPENDENCY
                        ),
                    );
                }
                state.edited = None;
                state.pending_edit = None;
                state.dirty = false;
                ProcessOutput::new(0, "")
            }
            ["package", "reset", ..] => {
                state.edited = None;
                state.pending_edit = None;
                state.dirty = false;
                ProcessOutput::new(0, "")
            }
            other => ProcessOutput::new(64, format!("error: unknown invocation {:?}\n", other)),
        }
    }
}

fn subcommand(args: &[String]) -> &str {
    match args.first().map(String::as_str) {
        Some("package") => args.get(1).map_or("", String::as_str),
        Some(other) => other,
        None => "",
    }
}

fn unknown_dependency(name: &str) -> ProcessOutput {
    ProcessOutput::new(
        1,
        format!("error: could not find a dependency named '{}'\n", name),
    )
}

/// Lowers the running counter however the invocation ends.
struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProcessRunner for FakeSwiftPm {
    async fn run(
        &self,
        invocation: &Invocation,
        cancel: CancelHandle,
    ) -> Result<ProcessOutput, TaskError> {
        let started_at = Instant::now();
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        let _active = ActiveGuard(&self.active);

        let delay = *self.delay.lock().expect("delay lock");
        let cancelled = tokio::select! {
            () = tokio::time::sleep(delay) => false,
            () = cancel.cancelled() => true,
        };

        let output = if cancelled {
            ProcessOutput::cancelled("Fetching https://github.com/apple/swift-markdown.git\n")
        } else {
            match self.take_failure(subcommand(&invocation.args)) {
                Some(failure) => failure,
                None => self.execute(&invocation.cwd, &invocation.args),
            }
        };

        self.executions.lock().expect("executions lock").push(Execution {
            folder: invocation.cwd.clone(),
            args: invocation.args.clone(),
            started_at,
            finished_at: Instant::now(),
            cancelled,
        });

        let hook = {
            let mut hooks = self.hooks.lock().expect("hooks lock");
            let sub = subcommand(&invocation.args);
            hooks
                .iter()
                .position(|(name, _)| name == sub)
                .map(|index| hooks.remove(index).1)
        };
        if let Some(hook) = hook {
            hook();
        }
        Ok(output)
    }
}

#[async_trait]
impl SnapshotProvider for FakeSwiftPm {
    async fn load(&self, package_root: &Path) -> swiftdeps_core::Result<DependencySnapshot> {
        let packages = self.packages.lock().expect("packages lock");
        let state = packages.get(package_root).cloned().unwrap_or_default();

        let mut snapshot = DependencySnapshot::new()
            .with_pin(pin(DEPENDENCY, &state.version))
            .with_pin(pin(TRANSITIVE, "0.2.0"));
        if let Some(path) = state.edited {
            snapshot.insert_edited(DEPENDENCY, path);
        }
        Ok(snapshot)
    }
}

fn pin(identity: &str, version: &str) -> PinnedPackage {
    PinnedPackage {
        identity: identity.into(),
        location: format!("https://github.com/apple/{}.git", identity),
        version: Some(version.into()),
        revision: None,
        branch: None,
    }
}

/// Directory of the local package that provides `PackageLib`.
pub(crate) fn local_package() -> PathBuf {
    PathBuf::from("/fixtures/Swift-Markdown")
}

/// Path of the `dependencies` fixture package.
pub(crate) fn package_folder() -> PathBuf {
    PathBuf::from("/fixtures/dependencies")
}

/// A coordinator over a workspace with the fixture package focused.
pub(crate) async fn setup(
    fake: &Arc<FakeSwiftPm>,
    config: WorkflowConfig,
) -> (DependencyCoordinator, Arc<swiftdeps::FolderContext>) {
    let workspace = Arc::new(WorkspaceContext::with_collaborators(
        config,
        Arc::clone(fake) as Arc<dyn ProcessRunner>,
        Arc::clone(fake) as Arc<dyn SnapshotProvider>,
    ));
    let folder = workspace
        .focus_folder(package_folder())
        .await
        .expect("focus fixture folder");
    (DependencyCoordinator::new(workspace), folder)
}
