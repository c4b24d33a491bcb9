//! Package archive reading and writing utilities.

use crate::error::{IntegrityError, IntegrityFailure};
use flate2::read::GzDecoder;
use itpkg_schema::PackagePath;
use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tar::{Archive, Builder, EntryType, Header};
use tracing::debug;
use walkdir::WalkDir;

/// Append a regular file with a deterministic header.
pub(crate) fn append_file<W: Write>(
    archive: &mut Builder<W>,
    path: &str,
    mode: u32,
    content: &[u8],
) -> io::Result<()> {
    let mut header = deterministic_header(EntryType::Regular, mode);
    header.set_size(content.len() as u64);
    archive.append_data(&mut header, path, content)
}

/// Append a directory entry with a deterministic header.
pub(crate) fn append_dir<W: Write>(
    archive: &mut Builder<W>,
    path: &str,
    mode: u32,
) -> io::Result<()> {
    let mut header = deterministic_header(EntryType::Directory, mode);
    header.set_size(0);
    archive.append_data(&mut header, format!("{path}/"), io::empty())
}

fn deterministic_header(kind: EntryType, mode: u32) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(kind);
    header.set_mode(mode & 0o7777);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header
}

/// File set listed by a content source.
#[derive(Debug, Clone, Default)]
pub struct Listing {
    /// Every non-directory entry, sorted by path.
    pub files: Vec<PackagePath>,
    /// Problems found while listing, reported as structural failures.
    pub failures: Vec<IntegrityFailure>,
}

/// Something whose files can be verified: a read archive or an extracted tree.
pub trait ContentSource {
    /// Human-readable locator for logs.
    fn locator(&self) -> String;

    fn listing(&self) -> Result<Listing, IntegrityError>;

    /// Contents of a file, or `None` when it is absent.
    fn read(&self, path: &str) -> Result<Option<Vec<u8>>, IntegrityError>;
}

/// An archive read fully into memory.
#[derive(Debug, Clone)]
pub struct ArchiveContents {
    path: PathBuf,
    /// Raw archive bytes, the same ones the entries below were decoded from.
    bytes: Vec<u8>,
    sha256: String,
    files: BTreeMap<PackagePath, Vec<u8>>,
    directories: Vec<PackagePath>,
    failures: Vec<IntegrityFailure>,
}

impl ArchiveContents {
    /// SHA-256 of the archive bytes.
    pub fn sha256(&self) -> &str {
        &self.sha256
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The archive exactly as read; extracting these bytes extracts what was verified.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn files(&self) -> impl Iterator<Item = (&PackagePath, &[u8])> {
        self.files.iter().map(|(p, c)| (p, c.as_slice()))
    }

    pub fn directories(&self) -> &[PackagePath] {
        &self.directories
    }
}

impl ContentSource for ArchiveContents {
    fn locator(&self) -> String {
        self.path.display().to_string()
    }

    fn listing(&self) -> Result<Listing, IntegrityError> {
        Ok(Listing {
            files: self.files.keys().cloned().collect(),
            failures: self.failures.clone(),
        })
    }

    fn read(&self, path: &str) -> Result<Option<Vec<u8>>, IntegrityError> {
        let Ok(path) = PackagePath::parse(path) else {
            return Ok(None);
        };
        Ok(self.files.get(&path).cloned())
    }
}

/// Read a package archive from disk.
///
/// Entries with unusable paths and repeated entries are recorded as
/// structural failures rather than aborting the read, so verification can
/// report them alongside everything else.
pub fn read_archive(path: &Path) -> Result<ArchiveContents, IntegrityError> {
    let unreadable = |source| IntegrityError::Unreadable {
        path: path.to_path_buf(),
        source,
    };
    let bytes = std::fs::read(path).map_err(unreadable)?;
    let sha256 = itpkg_common::hash::sha256_bytes(&bytes);

    let mut files = BTreeMap::new();
    let mut directories = Vec::new();
    let mut failures = Vec::new();

    let mut archive = Archive::new(GzDecoder::new(bytes.as_slice()));
    for entry in archive.entries().map_err(unreadable)? {
        let mut entry = entry.map_err(unreadable)?;
        let raw = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let kind = entry.header().entry_type();

        let package_path = match PackagePath::parse(raw.strip_suffix('/').unwrap_or(&raw)) {
            Ok(p) => p,
            Err(defect) => {
                debug!("Rejecting archive entry {:?}: {}", raw, defect);
                failures.push(IntegrityFailure::InvalidEntryPath { path: raw });
                continue;
            }
        };

        match kind {
            EntryType::Directory => directories.push(package_path),
            EntryType::Regular | EntryType::Continuous => {
                let mut content = Vec::new();
                entry.read_to_end(&mut content).map_err(unreadable)?;
                if files.contains_key(&package_path) {
                    failures.push(IntegrityFailure::DuplicateEntry {
                        path: package_path.to_string(),
                    });
                    continue;
                }
                files.insert(package_path, content);
            }
            other => {
                debug!("Ignoring archive entry {} of type {:?}", package_path, other);
            }
        }
    }

    drop(archive);

    debug!(
        "Read {} files from {:?} (sha256 {})",
        files.len(),
        path,
        sha256
    );
    Ok(ArchiveContents {
        path: path.to_path_buf(),
        bytes,
        sha256,
        files,
        directories,
        failures,
    })
}

/// An extracted package directory on disk.
#[derive(Debug, Clone)]
pub struct TreeSource {
    root: PathBuf,
}

impl TreeSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ContentSource for TreeSource {
    fn locator(&self) -> String {
        self.root.display().to_string()
    }

    fn listing(&self) -> Result<Listing, IntegrityError> {
        let mut listing = Listing::default();
        for item in WalkDir::new(&self.root).min_depth(1).follow_links(false) {
            let item = item.map_err(|e| IntegrityError::Unreadable {
                path: e.path().unwrap_or(&self.root).to_path_buf(),
                source: e.into(),
            })?;
            if item.file_type().is_dir() {
                continue;
            }
            let Ok(relative) = item.path().strip_prefix(&self.root) else {
                continue;
            };
            match PackagePath::from_relative(relative) {
                Ok(path) => listing.files.push(path),
                Err(_) => listing.failures.push(IntegrityFailure::InvalidEntryPath {
                    path: relative.display().to_string(),
                }),
            }
        }
        listing.files.sort();
        Ok(listing)
    }

    fn read(&self, path: &str) -> Result<Option<Vec<u8>>, IntegrityError> {
        let Ok(path) = PackagePath::parse(path) else {
            return Ok(None);
        };
        let target = path.under(&self.root);
        match std::fs::symlink_metadata(&target) {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(IntegrityError::Unreadable { path: target, source }),
        }
        std::fs::read(&target)
            .map(Some)
            .map_err(|source| IntegrityError::Unreadable { path: target, source })
    }
}
