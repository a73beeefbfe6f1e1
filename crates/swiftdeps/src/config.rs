use crate::error::{CoordinationError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use swiftdeps_core::{Admission, Invocation};

/// Configuration for the dependency workflow.
///
/// Every field has a default, so an empty JSON object is a valid
/// configuration.
///
/// # Defaults
///
/// - `swift_path`: `"swift"`
/// - `admission`: `queue`
/// - `scratch_path`: none (`.build`)
/// - `extra_args`: none
/// - `resolve_after_reset`: `true`
/// - `force_unedit`: `false`
/// - `build_tests`: `true`
///
/// # Examples
///
/// ```
/// use swiftdeps::config::WorkflowConfig;
/// use swiftdeps_core::Admission;
///
/// let json = r#"{
///     "swift_path": "/usr/bin/swift",
///     "admission": "reject",
///     "extra_args": ["-Xswiftc", "-warnings-as-errors"]
/// }"#;
///
/// let config: WorkflowConfig = serde_json::from_str(json).unwrap();
/// assert_eq!(config.admission, Admission::Reject);
/// assert!(config.resolve_after_reset);
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowConfig {
    /// Path to the `swift` executable.
    #[serde(default = "default_swift_path", deserialize_with = "deserialize_swift_path")]
    pub swift_path: String,

    /// Behavior of mutating operations when the folder is busy.
    #[serde(default)]
    pub admission: Admission,

    /// Custom scratch directory, passed as `--scratch-path`.
    #[serde(default)]
    pub scratch_path: Option<PathBuf>,

    /// Appended to every `swift` invocation.
    #[serde(default)]
    pub extra_args: Vec<String>,

    /// Run `swift package resolve` right after a successful reset.
    #[serde(default = "default_true")]
    pub resolve_after_reset: bool,

    /// Retry `unedit` with `--force` when the checkout has local changes.
    #[serde(default)]
    pub force_unedit: bool,

    /// Build test targets too (`--build-tests`).
    #[serde(default = "default_true")]
    pub build_tests: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            swift_path: default_swift_path(),
            admission: Admission::default(),
            scratch_path: None,
            extra_args: Vec::new(),
            resolve_after_reset: true,
            force_unedit: false,
            build_tests: true,
        }
    }
}

impl WorkflowConfig {
    /// Reads a configuration file.
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        serde_json::from_str(&content).map_err(|source| CoordinationError::Config {
            path: path.to_path_buf(),
            source,
        })
    }

    /// `swift package <args>` in `cwd`.
    pub fn package_command<I, S>(&self, cwd: &Path, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.finish(Invocation::new(&self.swift_path, cwd).arg("package").args(args))
    }

    /// `swift build` in `cwd`.
    pub fn build_command(&self, cwd: &Path) -> Invocation {
        let mut invocation = Invocation::new(&self.swift_path, cwd).arg("build");
        if self.build_tests {
            invocation = invocation.arg("--build-tests");
        }
        self.finish(invocation)
    }

    fn finish(&self, mut invocation: Invocation) -> Invocation {
        if let Some(scratch) = &self.scratch_path {
            invocation = invocation
                .arg("--scratch-path")
                .arg(scratch.to_string_lossy());
        }
        invocation.args(self.extra_args.iter().cloned())
    }
}

const fn default_true() -> bool {
    true
}

fn default_swift_path() -> String {
    "swift".to_string()
}

/// Falls back to the default executable when the configured path is blank.
fn deserialize_swift_path<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let path = String::deserialize(deserializer)?;
    if path.trim().is_empty() {
        tracing::warn!("swift_path is empty, using '{}'", default_swift_path());
        return Ok(default_swift_path());
    }
    Ok(path)
}
