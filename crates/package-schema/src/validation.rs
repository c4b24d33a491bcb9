//! Package validation: manifest rules and the shared three-tier report.

use crate::checksum::{PackagePath, PathDefect};
use crate::manifest::Manifest;
use regex::Regex;
use serde::Serialize;
use std::path::Path;
use std::sync::LazyLock;
use thiserror::Error;

/// Scoped package name, e.g. `@acme/hello-world`.
pub static SCOPED_NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@[a-z0-9][a-z0-9._-]*/[a-z0-9][a-z0-9._-]*$").unwrap()
});

/// Semantic version with optional pre-release and build metadata.
pub static SEMVER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(0|[1-9]\d*)\.(0|[1-9]\d*)\.(0|[1-9]\d*)(?:-[0-9A-Za-z.-]+)?(?:\+[0-9A-Za-z.-]+)?$")
        .unwrap()
});

/// A single validation finding.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum ValidationIssue {
    #[error("required field is empty: {field}")]
    MissingField { field: &'static str },

    #[error("entry is required for app packages")]
    MissingEntry,

    #[error("entry file not found: {entry}")]
    EntryNotFound { entry: String },

    #[error("entry must be a relative path inside the package: {entry} ({reason})")]
    EntryOutsideTree { entry: String, reason: String },

    #[error("policies are required")]
    MissingPolicies,

    #[error("policies.security.network is required for app packages")]
    MissingNetworkPolicy,

    #[error("name is not of the form @scope/name: {name}")]
    UnscopedName { name: String },

    #[error("version is not a semantic version: {version}")]
    NonSemverVersion { version: String },

    #[error("required directory missing: {dir}")]
    MissingRequiredDir { dir: String },

    #[error("recommended directory missing: {dir}")]
    MissingRecommendedDir { dir: String },

    #[error("no tests directory found for app package")]
    AppWithoutTests,

    #[error("file outside the recognized layout: {path}")]
    UnrecognizedFile { path: String },

    #[error("not a regular file, will not be packaged: {path}")]
    UnsupportedFileType { path: String },

    #[error("engine-owned file present in source tree, will not be packaged: {path}")]
    ReservedFile { path: String },

    #[error("file name cannot be packaged: {path} ({reason})")]
    UnpackageablePath { path: String, reason: String },

    #[error("failed to read source tree at {path}: {reason}")]
    Unreadable { path: String, reason: String },
}

/// Result of validation, split by severity. Only `errors` block packaging.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    pub infos: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, issue: ValidationIssue) {
        self.errors.push(issue);
    }

    pub fn add_warning(&mut self, issue: ValidationIssue) {
        self.warnings.push(issue);
    }

    pub fn add_info(&mut self, issue: ValidationIssue) {
        self.infos.push(issue);
    }

    /// True when nothing blocks packaging.
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Append another report, skipping findings already present.
    pub fn merge(&mut self, other: ValidationReport) {
        for (into, from) in [
            (&mut self.errors, other.errors),
            (&mut self.warnings, other.warnings),
            (&mut self.infos, other.infos),
        ] {
            for issue in from {
                if !into.contains(&issue) {
                    into.push(issue);
                }
            }
        }
    }
}

/// Validate manifest fields against the package source tree.
///
/// Every rule is evaluated; the report carries all violations.
pub fn validate_manifest(manifest: &Manifest, source_root: &Path) -> ValidationReport {
    let mut report = ValidationReport::new();

    if manifest.name.trim().is_empty() {
        report.add_error(ValidationIssue::MissingField { field: "name" });
    } else if !SCOPED_NAME_PATTERN.is_match(&manifest.name) {
        report.add_warning(ValidationIssue::UnscopedName {
            name: manifest.name.clone(),
        });
    }

    if manifest.version.trim().is_empty() {
        report.add_error(ValidationIssue::MissingField { field: "version" });
    } else if !SEMVER_PATTERN.is_match(&manifest.version) {
        report.add_warning(ValidationIssue::NonSemverVersion {
            version: manifest.version.clone(),
        });
    }

    if manifest.format_version.trim().is_empty() {
        report.add_error(ValidationIssue::MissingField {
            field: "itmlVersion",
        });
    }

    if manifest.is_app() {
        match manifest.entry.as_deref().filter(|e| !e.is_empty()) {
            None => report.add_error(ValidationIssue::MissingEntry),
            Some(entry) => match entry_path(entry) {
                Err(defect) => report.add_error(ValidationIssue::EntryOutsideTree {
                    entry: entry.to_string(),
                    reason: defect.to_string(),
                }),
                Ok(path) if !path.under(source_root).is_file() => {
                    report.add_error(ValidationIssue::EntryNotFound {
                        entry: entry.to_string(),
                    })
                }
                Ok(_) => {}
            },
        }
    }

    match &manifest.policies {
        None => report.add_error(ValidationIssue::MissingPolicies),
        Some(policies) => {
            if manifest.is_app() && !policies.has_network_policy() {
                report.add_error(ValidationIssue::MissingNetworkPolicy);
            }
        }
    }

    report
}

/// Entry paths are written by hand, so a leading `./` is tolerated.
pub(crate) fn entry_path(entry: &str) -> Result<PackagePath, PathDefect> {
    PackagePath::parse(entry.strip_prefix("./").unwrap_or(entry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::PackageKind;
    use crate::policy::Policies;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn app_manifest() -> Manifest {
        let mut manifest = Manifest::new("@scope/demo", "0.1.0", PackageKind::App);
        manifest.entry = Some("project.app.itml".to_string());
        manifest
    }

    #[test]
    fn test_valid_lib_manifest() {
        let dir = tempdir().unwrap();
        let manifest = Manifest::new("@scope/demo", "0.1.0", PackageKind::Lib);
        let report = validate_manifest(&manifest, dir.path());
        assert!(report.is_valid(), "{:?}", report.errors);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_valid_app_manifest() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("project.app.itml"), "app \"demo\"\n").unwrap();
        let report = validate_manifest(&app_manifest(), dir.path());
        assert!(report.is_valid(), "{:?}", report.errors);
    }

    #[test]
    fn test_collects_every_violation() {
        let dir = tempdir().unwrap();
        let mut manifest = app_manifest();
        manifest.name.clear();
        manifest.version.clear();
        manifest.format_version.clear();
        manifest.entry = None;
        manifest.policies = None;

        let report = validate_manifest(&manifest, dir.path());
        assert_eq!(
            report.errors,
            vec![
                ValidationIssue::MissingField { field: "name" },
                ValidationIssue::MissingField { field: "version" },
                ValidationIssue::MissingField {
                    field: "itmlVersion"
                },
                ValidationIssue::MissingEntry,
                ValidationIssue::MissingPolicies,
            ]
        );
    }

    #[test]
    fn test_app_entry_must_exist() {
        let dir = tempdir().unwrap();
        let report = validate_manifest(&app_manifest(), dir.path());
        assert_eq!(
            report.errors,
            vec![ValidationIssue::EntryNotFound {
                entry: "project.app.itml".to_string()
            }]
        );
    }

    #[test]
    fn test_app_entry_cannot_escape() {
        let dir = tempdir().unwrap();
        let mut manifest = app_manifest();
        manifest.entry = Some("../outside.itml".to_string());
        let report = validate_manifest(&manifest, dir.path());
        assert!(matches!(
            report.errors.as_slice(),
            [ValidationIssue::EntryOutsideTree { .. }]
        ));
    }

    #[test]
    fn test_app_requires_network_policy() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("project.app.itml"), "").unwrap();
        let mut manifest = app_manifest();
        manifest.policies = Some(Policies::default());
        let report = validate_manifest(&manifest, dir.path());
        assert_eq!(report.errors, vec![ValidationIssue::MissingNetworkPolicy]);
    }

    #[test]
    fn test_lib_does_not_need_network_policy() {
        let dir = tempdir().unwrap();
        let mut manifest = Manifest::new("@scope/demo", "0.1.0", PackageKind::Lib);
        manifest.policies = Some(Policies::default());
        assert!(validate_manifest(&manifest, dir.path()).is_valid());
    }

    #[test]
    fn test_name_and_version_style_warnings() {
        let dir = tempdir().unwrap();
        let manifest = Manifest::new("demo", "v1", PackageKind::Lib);
        let report = validate_manifest(&manifest, dir.path());
        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 2);
    }

    #[test]
    fn test_merge_skips_repeated_findings() {
        let mut first = ValidationReport::new();
        first.add_error(ValidationIssue::MissingEntry);
        let mut second = ValidationReport::new();
        second.add_error(ValidationIssue::MissingEntry);
        second.add_warning(ValidationIssue::AppWithoutTests);

        first.merge(second);
        assert_eq!(first.errors, vec![ValidationIssue::MissingEntry]);
        assert_eq!(first.warnings, vec![ValidationIssue::AppWithoutTests]);
    }

    #[test]
    fn test_semver_pattern() {
        assert!(SEMVER_PATTERN.is_match("1.2.3"));
        assert!(SEMVER_PATTERN.is_match("1.2.3-beta.1+build.5"));
        assert!(!SEMVER_PATTERN.is_match("01.2.3"));
        assert!(!SEMVER_PATTERN.is_match("1.2"));
    }
}
