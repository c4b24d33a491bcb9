//! Source tree layout rules and the tree scan shared with the archive builder.

use crate::checksum::{PackagePath, CHECKSUM_FILE, SIGNATURE_FILE};
use crate::install::INSTALL_RECORD_FILE;
use crate::manifest::{Manifest, MANIFEST_FILE};
use crate::validation::{entry_path, ValidationIssue, ValidationReport};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Directories every package must have.
pub const REQUIRED_DIRS: &[&str] = &["intents", "policies"];

/// Directories packages are expected to have.
pub const RECOMMENDED_DIRS: &[&str] = &["schemas", "tests", ".ci", "assets"];

/// Root files that are part of the recognized shape besides the manifest and entry.
const RECOGNIZED_ROOT_FILES: &[&str] = &["README.md", "LICENSE"];

/// Kind of a packageable tree entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
}

/// A directory or regular file found in the source tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub path: PackagePath,
    pub kind: EntryKind,
    /// Permission bits.
    pub mode: u32,
    /// Absolute location on disk.
    pub source: PathBuf,
}

/// Everything under a source root that will be packaged, sorted by path.
#[derive(Debug, Clone, Default)]
pub struct SourceScan {
    pub entries: Vec<TreeEntry>,
    pub report: ValidationReport,
}

impl SourceScan {
    pub fn files(&self) -> impl Iterator<Item = &TreeEntry> {
        self.entries.iter().filter(|e| e.kind == EntryKind::File)
    }
}

/// Walk `root` and collect packageable entries.
///
/// The manifest file and engine-owned metadata at the root are skipped, as
/// is any path in `excluded`. Non-regular files are noted and skipped.
pub fn scan_tree(root: &Path, excluded: &[PathBuf]) -> SourceScan {
    let mut scan = SourceScan::default();

    for item in WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let item = match item {
            Ok(item) => item,
            Err(e) => {
                let path = e
                    .path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| root.display().to_string());
                scan.report.add_error(ValidationIssue::Unreadable {
                    path,
                    reason: e.to_string(),
                });
                continue;
            }
        };
        if excluded.iter().any(|ex| ex == item.path()) {
            debug!("Skipping excluded path {:?}", item.path());
            continue;
        }
        let Ok(relative) = item.path().strip_prefix(root) else {
            continue;
        };
        let display = relative.display().to_string();
        let path = match PackagePath::from_relative(relative) {
            Ok(path) => path,
            Err(reason) => {
                scan.report.add_error(ValidationIssue::UnpackageablePath {
                    path: display,
                    reason: reason.to_string(),
                });
                continue;
            }
        };

        if path.is_root_file() {
            if path.as_str() == MANIFEST_FILE {
                continue;
            }
            if [CHECKSUM_FILE, SIGNATURE_FILE, INSTALL_RECORD_FILE].contains(&path.as_str()) {
                scan.report
                    .add_info(ValidationIssue::ReservedFile { path: display });
                continue;
            }
        }

        let file_type = item.file_type();
        let kind = if file_type.is_dir() {
            EntryKind::Directory
        } else if file_type.is_file() {
            EntryKind::File
        } else {
            scan.report
                .add_info(ValidationIssue::UnsupportedFileType { path: display });
            continue;
        };

        let mode = match item.metadata() {
            Ok(meta) => permission_bits(&meta, kind),
            Err(e) => {
                scan.report.add_error(ValidationIssue::Unreadable {
                    path: display,
                    reason: e.to_string(),
                });
                continue;
            }
        };

        scan.entries.push(TreeEntry {
            path,
            kind,
            mode,
            source: item.path().to_path_buf(),
        });
    }

    scan.entries.sort_by(|a, b| a.path.cmp(&b.path));
    scan
}

#[cfg(unix)]
fn permission_bits(meta: &std::fs::Metadata, _kind: EntryKind) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permission_bits(meta: &std::fs::Metadata, kind: EntryKind) -> u32 {
    match kind {
        EntryKind::Directory => 0o755,
        EntryKind::File if meta.permissions().readonly() => 0o444,
        EntryKind::File => 0o644,
    }
}

/// Check the source tree shape.
///
/// Errors block packaging, warnings flag missing conventions, infos note
/// files outside the recognized shape.
pub fn check_layout(source_root: &Path, manifest: &Manifest) -> ValidationReport {
    check_scanned_layout(source_root, manifest, &scan_tree(source_root, &[]))
}

/// [`check_layout`] over a tree that was already scanned.
pub fn check_scanned_layout(
    source_root: &Path,
    manifest: &Manifest,
    scan: &SourceScan,
) -> ValidationReport {
    let mut report = ValidationReport::new();

    for dir in REQUIRED_DIRS {
        if !source_root.join(dir).is_dir() {
            report.add_error(ValidationIssue::MissingRequiredDir {
                dir: dir.to_string(),
            });
        }
    }

    let entry = manifest
        .entry
        .as_deref()
        .filter(|e| !e.is_empty())
        .and_then(|e| entry_path(e).ok());
    if manifest.is_app() {
        if let (Some(raw), Some(entry)) = (manifest.entry.as_deref(), &entry) {
            if !entry.under(source_root).is_file() {
                report.add_error(ValidationIssue::EntryNotFound {
                    entry: raw.to_string(),
                });
            }
        }
    }

    for dir in RECOMMENDED_DIRS {
        if !source_root.join(dir).is_dir() {
            report.add_warning(ValidationIssue::MissingRecommendedDir {
                dir: dir.to_string(),
            });
        }
    }

    if manifest.is_app() && !source_root.join("tests").is_dir() {
        report.add_warning(ValidationIssue::AppWithoutTests);
    }

    for item in scan.entries.iter().filter(|e| e.path.is_root_file()) {
        let name = item.path.as_str();
        let recognized = match item.kind {
            EntryKind::Directory => {
                REQUIRED_DIRS.contains(&name) || RECOMMENDED_DIRS.contains(&name)
            }
            EntryKind::File => {
                RECOGNIZED_ROOT_FILES.contains(&name)
                    || entry.as_ref().is_some_and(|e| e.as_str() == name)
            }
        };
        if !recognized {
            report.add_info(ValidationIssue::UnrecognizedFile {
                path: name.to_string(),
            });
        }
    }
    report.merge(scan.report.clone());

    report
}
