//! Recognizers for package-manager output.
//!
//! The package manager reports dependency problems only as text. These
//! markers are matched verbatim; changing them breaks compatibility with the
//! tool's diagnostics.

use once_cell::sync::Lazy;
use regex::Regex;

/// Present when a build cannot find a product a target depends on.
pub const REQUIRED_MARKER: &str = "required";

/// Present in the warning for a declared dependency no target uses.
pub const UNUSED_DEPENDENCY_MARKER: &str = "not used by any target";

/// Present when `unedit` refuses to discard local modifications.
pub const UNCOMMITTED_CHANGES_MARKER: &str = "has uncommitted changes";

static MISSING_PRODUCT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"product '([^']+)' required by package '([^']+)'").unwrap()
});

static UNUSED_DEPENDENCY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"dependency '([^']+)' is not used by any target").unwrap());

/// A product a target needs but no resolved dependency provides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingProduct {
    pub product: String,
    /// Package whose target asked for the product.
    pub package: String,
}

/// Returns true if the output reports an unresolved mandatory dependency.
pub fn reports_missing_requirement(output: &str) -> bool {
    output.contains(REQUIRED_MARKER)
}

/// Returns true if the output names `subject` (a product, package or target).
pub fn mentions(output: &str, subject: &str) -> bool {
    output.contains(subject)
}

pub fn reports_uncommitted_changes(output: &str) -> bool {
    output.contains(UNCOMMITTED_CHANGES_MARKER)
}

/// Extracts every missing product reported in the output.
///
/// # Examples
///
/// ```
/// use swiftdeps_core::output::missing_products;
///
/// let output = "error: 'defaultpackage': product 'PackageLib' required by package \
///               'defaultpackage' target 'defaultpackage' not found.";
/// let missing = missing_products(output);
///
/// assert_eq!(missing.len(), 1);
/// assert_eq!(missing[0].product, "PackageLib");
/// assert_eq!(missing[0].package, "defaultpackage");
/// ```
pub fn missing_products(output: &str) -> Vec<MissingProduct> {
    MISSING_PRODUCT
        .captures_iter(output)
        .map(|caps| MissingProduct {
            product: caps[1].to_string(),
            package: caps[2].to_string(),
        })
        .collect()
}

/// Extracts dependencies reported as unused by any target.
pub fn unused_dependencies(output: &str) -> Vec<String> {
    UNUSED_DEPENDENCY
        .captures_iter(output)
        .map(|caps| caps[1].to_string())
        .collect()
}
