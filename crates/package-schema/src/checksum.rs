//! The `MANIFEST.sha256` checksum manifest.
//!
//! One line per file, `<64 hex digest><two spaces><relative/path>\n`,
//! strictly sorted by path with no duplicates. The serialized bytes are
//! exactly what the package signature covers.

use crate::manifest::MANIFEST_FILE;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// File name of the checksum manifest at the archive root.
pub const CHECKSUM_FILE: &str = "MANIFEST.sha256";

/// File name of the signature at the archive root.
pub const SIGNATURE_FILE: &str = "SIGNATURE";

const SEPARATOR: &str = "  ";

/// A SHA-256 digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sha256Digest([u8; 32]);

impl Sha256Digest {
    /// Digest of the given bytes.
    pub fn of(data: &[u8]) -> Self {
        Self(itpkg_common::hash::sha256_digest(data))
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Sha256Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Sha256Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sha256Digest({})", self.to_hex())
    }
}

/// Error parsing a hex digest.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("expected 64 lowercase hex characters")]
pub struct InvalidDigest;

impl FromStr for Sha256Digest {
    type Err = InvalidDigest;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 64 || !s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(InvalidDigest);
        }
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| InvalidDigest)?;
        Ok(Self(bytes))
    }
}

/// Why a path is not a valid package path.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathDefect {
    #[error("path is empty")]
    Empty,
    #[error("path is absolute")]
    Absolute,
    #[error("path contains a `..` segment")]
    ParentSegment,
    #[error("path contains a `.` segment")]
    CurrentSegment,
    #[error("path contains an empty segment")]
    EmptySegment,
    #[error("path contains a backslash")]
    Backslash,
    #[error("path contains a control character")]
    ControlCharacter,
    #[error("path is not valid UTF-8")]
    NotUtf8,
}

/// A normalized, forward-slash, root-relative path inside a package.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackagePath(String);

impl PackagePath {
    pub fn parse(raw: &str) -> Result<Self, PathDefect> {
        if raw.is_empty() {
            return Err(PathDefect::Empty);
        }
        if raw.starts_with('/') {
            return Err(PathDefect::Absolute);
        }
        if raw.contains('\\') {
            return Err(PathDefect::Backslash);
        }
        if raw.chars().any(char::is_control) {
            return Err(PathDefect::ControlCharacter);
        }
        for segment in raw.split('/') {
            match segment {
                "" => return Err(PathDefect::EmptySegment),
                "." => return Err(PathDefect::CurrentSegment),
                ".." => return Err(PathDefect::ParentSegment),
                _ => {}
            }
        }
        Ok(Self(raw.to_string()))
    }

    /// Build from a path relative to a source root, joining components with `/`.
    pub fn from_relative(relative: &Path) -> Result<Self, PathDefect> {
        let mut segments = Vec::new();
        for component in relative.components() {
            match component {
                std::path::Component::Normal(part) => {
                    segments.push(part.to_str().ok_or(PathDefect::NotUtf8)?);
                }
                std::path::Component::CurDir => return Err(PathDefect::CurrentSegment),
                std::path::Component::ParentDir => return Err(PathDefect::ParentSegment),
                std::path::Component::RootDir | std::path::Component::Prefix(_) => {
                    return Err(PathDefect::Absolute)
                }
            }
        }
        Self::parse(&segments.join("/"))
    }

    /// Location of the package manifest at the root.
    pub fn manifest() -> Self {
        Self(MANIFEST_FILE.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The native path of this entry below `root`.
    pub fn under(&self, root: &Path) -> PathBuf {
        self.0.split('/').fold(root.to_path_buf(), |acc, s| acc.join(s))
    }

    /// Whether this path is a file at the package root.
    pub fn is_root_file(&self) -> bool {
        !self.0.contains('/')
    }
}

impl fmt::Display for PackagePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One line of the checksum manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumEntry {
    pub digest: Sha256Digest,
    pub path: PackagePath,
}

impl ChecksumEntry {
    pub fn new(path: PackagePath, contents: &[u8]) -> Self {
        Self {
            digest: Sha256Digest::of(contents),
            path,
        }
    }
}

/// A defect found in a checksum manifest.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChecksumDefect {
    #[error("checksum manifest is not valid UTF-8")]
    NotUtf8,

    #[error("checksum manifest does not end with a newline")]
    MissingTrailingNewline,

    #[error("line {line}: expected `<digest>  <path>`")]
    MalformedLine { line: usize },

    #[error("line {line}: invalid digest")]
    InvalidDigest { line: usize },

    #[error("line {line}: invalid path {path:?}: {reason}")]
    InvalidPath {
        line: usize,
        path: String,
        reason: PathDefect,
    },

    #[error("line {line}: {path} is out of order after {previous}")]
    OutOfOrder {
        line: usize,
        previous: String,
        path: String,
    },

    #[error("line {line}: duplicate path {path}")]
    Duplicate { line: usize, path: String },

    #[error("line {line}: checksum manifest lists itself")]
    SelfReference { line: usize },

    #[error("line {line}: reserved path {path} cannot be listed")]
    ReservedPath { line: usize, path: String },
}

/// Sorted, duplicate-free list of checksum entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChecksumManifest {
    entries: Vec<ChecksumEntry>,
}

impl ChecksumManifest {
    /// Sort entries by path and check the manifest invariants.
    pub fn from_entries(mut entries: Vec<ChecksumEntry>) -> Result<Self, Vec<ChecksumDefect>> {
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        let mut defects = Vec::new();
        for (idx, entry) in entries.iter().enumerate() {
            let line = idx + 1;
            check_reserved(line, &entry.path, &mut defects);
            if idx > 0 && entries[idx - 1].path == entry.path {
                defects.push(ChecksumDefect::Duplicate {
                    line,
                    path: entry.path.to_string(),
                });
            }
        }
        if defects.is_empty() {
            Ok(Self { entries })
        } else {
            Err(defects)
        }
    }

    /// Parse serialized bytes, collecting every defect. Ordering is checked
    /// as written, never repaired.
    pub fn parse(bytes: &[u8]) -> Result<Self, Vec<ChecksumDefect>> {
        let text = std::str::from_utf8(bytes).map_err(|_| vec![ChecksumDefect::NotUtf8])?;
        let mut defects = Vec::new();
        let mut entries: Vec<ChecksumEntry> = Vec::new();

        if text.is_empty() {
            return Ok(Self::default());
        }
        let body = match text.strip_suffix('\n') {
            Some(body) => body,
            None => {
                defects.push(ChecksumDefect::MissingTrailingNewline);
                text
            }
        };

        let mut previous: Option<PackagePath> = None;
        for (idx, raw) in body.split('\n').enumerate() {
            let line = idx + 1;
            let Some((digest, path)) = raw.split_once(SEPARATOR) else {
                defects.push(ChecksumDefect::MalformedLine { line });
                continue;
            };
            let digest = match digest.parse::<Sha256Digest>() {
                Ok(d) => Some(d),
                Err(_) => {
                    defects.push(ChecksumDefect::InvalidDigest { line });
                    None
                }
            };
            let path = match PackagePath::parse(path) {
                Ok(p) => p,
                Err(reason) => {
                    defects.push(ChecksumDefect::InvalidPath {
                        line,
                        path: path.to_string(),
                        reason,
                    });
                    continue;
                }
            };
            check_reserved(line, &path, &mut defects);
            if let Some(prev) = &previous {
                if path == *prev {
                    defects.push(ChecksumDefect::Duplicate {
                        line,
                        path: path.to_string(),
                    });
                } else if path < *prev {
                    defects.push(ChecksumDefect::OutOfOrder {
                        line,
                        previous: prev.to_string(),
                        path: path.to_string(),
                    });
                }
            }
            previous = Some(path.clone());
            if let Some(digest) = digest {
                entries.push(ChecksumEntry { digest, path });
            }
        }

        if defects.is_empty() {
            Ok(Self { entries })
        } else {
            Err(defects)
        }
    }

    pub fn entries(&self) -> &[ChecksumEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&ChecksumEntry> {
        self.entries
            .binary_search_by(|e| e.path.as_str().cmp(path))
            .ok()
            .map(|idx| &self.entries[idx])
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Serialized form, one LF-terminated line per entry.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&entry.digest.to_hex());
            out.push_str(SEPARATOR);
            out.push_str(entry.path.as_str());
            out.push('\n');
        }
        out.into_bytes()
    }
}

fn check_reserved(line: usize, path: &PackagePath, defects: &mut Vec<ChecksumDefect>) {
    match path.as_str() {
        CHECKSUM_FILE => defects.push(ChecksumDefect::SelfReference { line }),
        SIGNATURE_FILE => defects.push(ChecksumDefect::ReservedPath {
            line,
            path: path.to_string(),
        }),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entry(path: &str, contents: &[u8]) -> ChecksumEntry {
        ChecksumEntry::new(PackagePath::parse(path).unwrap(), contents)
    }

    #[test]
    fn test_from_entries_sorts_by_path() {
        let manifest = ChecksumManifest::from_entries(vec![
            entry("policies/security.itml", b"p"),
            entry("intents/hello.itml", b"i"),
            entry("itpkg.json", b"{}"),
        ])
        .unwrap();
        let paths: Vec<&str> = manifest.entries().iter().map(|e| e.path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["intents/hello.itml", "itpkg.json", "policies/security.itml"]
        );
    }

    #[test]
    fn test_serialized_format() {
        let manifest = ChecksumManifest::from_entries(vec![entry("a.txt", b"hello world")]).unwrap();
        assert_eq!(
            String::from_utf8(manifest.to_bytes()).unwrap(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9  a.txt\n"
        );
    }

    #[test]
    fn test_parse_accepts_serialized_form() {
        let manifest = ChecksumManifest::from_entries(vec![
            entry("b/c.txt", b"1"),
            entry("a.txt", b"2"),
        ])
        .unwrap();
        let parsed = ChecksumManifest::parse(&manifest.to_bytes()).unwrap();
        assert_eq!(parsed, manifest);
        assert!(parsed.contains("b/c.txt"));
        assert!(!parsed.contains("c.txt"));
    }

    #[test]
    fn test_from_entries_rejects_duplicates() {
        let defects =
            ChecksumManifest::from_entries(vec![entry("a.txt", b"1"), entry("a.txt", b"2")])
                .unwrap_err();
        assert_eq!(
            defects,
            vec![ChecksumDefect::Duplicate {
                line: 2,
                path: "a.txt".to_string()
            }]
        );
    }

    #[test]
    fn test_parse_rejects_out_of_order() {
        let a = Sha256Digest::of(b"a");
        let b = Sha256Digest::of(b"b");
        let text = format!("{b}  b.txt\n{a}  a.txt\n");
        let defects = ChecksumManifest::parse(text.as_bytes()).unwrap_err();
        assert_eq!(
            defects,
            vec![ChecksumDefect::OutOfOrder {
                line: 2,
                previous: "b.txt".to_string(),
                path: "a.txt".to_string()
            }]
        );
    }

    #[test]
    fn test_parse_rejects_duplicate_even_with_correct_digest() {
        let a = Sha256Digest::of(b"a");
        let text = format!("{a}  a.txt\n{a}  a.txt\n");
        let defects = ChecksumManifest::parse(text.as_bytes()).unwrap_err();
        assert!(matches!(defects[0], ChecksumDefect::Duplicate { line: 2, .. }));
    }

    #[test]
    fn test_parse_rejects_self_reference() {
        let a = Sha256Digest::of(b"a");
        let text = format!("{a}  {CHECKSUM_FILE}\n");
        let defects = ChecksumManifest::parse(text.as_bytes()).unwrap_err();
        assert_eq!(defects, vec![ChecksumDefect::SelfReference { line: 1 }]);
    }

    #[test]
    fn test_parse_collects_all_defects() {
        let a = Sha256Digest::of(b"a");
        let text = format!("zz  a.txt\nnot a line\n{a}  ../escape\n{a}  b.txt");
        let defects = ChecksumManifest::parse(text.as_bytes()).unwrap_err();
        assert!(defects.contains(&ChecksumDefect::MissingTrailingNewline));
        assert!(defects.contains(&ChecksumDefect::InvalidDigest { line: 1 }));
        assert!(defects.contains(&ChecksumDefect::MalformedLine { line: 2 }));
        assert!(defects.contains(&ChecksumDefect::InvalidPath {
            line: 3,
            path: "../escape".to_string(),
            reason: PathDefect::ParentSegment
        }));
    }

    #[test]
    fn test_parse_rejects_uppercase_digest() {
        let upper = Sha256Digest::of(b"a").to_hex().to_uppercase();
        let text = format!("{upper}  a.txt\n");
        let defects = ChecksumManifest::parse(text.as_bytes()).unwrap_err();
        assert_eq!(defects, vec![ChecksumDefect::InvalidDigest { line: 1 }]);
    }

    #[test]
    fn test_package_path_rules() {
        assert!(PackagePath::parse("intents/hello.itml").is_ok());
        assert_eq!(PackagePath::parse(""), Err(PathDefect::Empty));
        assert_eq!(PackagePath::parse("/etc/passwd"), Err(PathDefect::Absolute));
        assert_eq!(PackagePath::parse("a/../b"), Err(PathDefect::ParentSegment));
        assert_eq!(PackagePath::parse("./a"), Err(PathDefect::CurrentSegment));
        assert_eq!(PackagePath::parse("a//b"), Err(PathDefect::EmptySegment));
        assert_eq!(PackagePath::parse("a\\b"), Err(PathDefect::Backslash));
        assert_eq!(PackagePath::parse("a\nb"), Err(PathDefect::ControlCharacter));
    }

    #[test]
    fn test_package_path_from_relative() {
        let path = PackagePath::from_relative(Path::new("intents").join("hello.itml").as_path())
            .unwrap();
        assert_eq!(path.as_str(), "intents/hello.itml");
        assert!(!path.is_root_file());
        assert!(PackagePath::from_relative(Path::new("../x")).is_err());
    }
}
