//! Package schema definitions for itpkg.
//!
//! This crate defines the package manifest, its typed policies, the
//! checksum manifest and signature file formats, and the validators that
//! decide whether a source tree may be packaged.

pub mod checksum;
pub mod install;
pub mod layout;
pub mod manifest;
pub mod policy;
pub mod schema;
pub mod signature;
pub mod validation;

pub use checksum::{
    ChecksumDefect, ChecksumEntry, ChecksumManifest, PackagePath, PathDefect, Sha256Digest,
    CHECKSUM_FILE, SIGNATURE_FILE,
};
pub use install::{InstallRecord, INSTALL_RECORD_FILE};
pub use layout::{check_layout, check_scanned_layout, scan_tree, EntryKind, SourceScan, TreeEntry};
pub use manifest::{Manifest, ManifestError, Meta, PackageKind, SignatureMeta, MANIFEST_FILE};
pub use policy::{
    Access, EnergyMode, FilesystemPolicy, NetworkPolicy, PiiPolicy, Policies, PolicyDomain,
    PrivacyPolicy, ResourcePolicy, RuleSet, SecurityPolicy,
};
pub use signature::{Signature, SignatureFileError, LEGACY_MAC_PREFIX, UNSIGNED_MARKER};
pub use validation::{validate_manifest, ValidationIssue, ValidationReport};

/// Engine-owned files at the archive root that are never part of the
/// project's own file set.
pub const ENGINE_OWNED_FILES: &[&str] = &[MANIFEST_FILE, CHECKSUM_FILE, SIGNATURE_FILE];
