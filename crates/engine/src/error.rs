//! Structured error taxonomy of the integrity engine.
//!
//! Every error carries enough detail (file, check, expected vs actual) for
//! a caller to render its own message or branch on the kind.

use itpkg_schema::{ChecksumDefect, Sha256Digest, SignatureFileError, ValidationReport};
use std::path::PathBuf;
use thiserror::Error;

/// Manifest or layout is malformed; no archive is produced.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("failed to load itpkg.json: {0}")]
    Manifest(#[from] itpkg_schema::ManifestError),

    #[error("package validation failed with {} error(s)", .0.errors.len())]
    Invalid(ValidationReport),
}

impl ValidationError {
    /// The full report when validation ran to completion.
    pub fn report(&self) -> Option<&ValidationReport> {
        match self {
            ValidationError::Invalid(report) => Some(report),
            ValidationError::Manifest(_) => None,
        }
    }
}

/// No signing key was supplied and unsigned output was not allowed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SigningError {
    #[error("signing key not provided and unsigned packages are not allowed")]
    KeyRequired,

    #[error("unusable MAC key: {0}")]
    InvalidMacKey(String),
}

/// Failure of a build.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Signing(#[from] SigningError),

    #[error("failed to read source file {path}")]
    ReadSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write archive {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize itpkg.json: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("checksum list is inconsistent: {0:?}")]
    Checksums(Vec<ChecksumDefect>),
}

/// Which verification step a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Malformed archive or checksum manifest; found before any digest or
    /// signature check.
    Structural,
    Missing,
    Unexpected,
    Modified,
    Signature,
}

/// One reason a package is untrusted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntegrityFailure {
    #[error("required metadata file missing: {file}")]
    MetadataMissing { file: &'static str },

    #[error("archive entry has an invalid path: {path}")]
    InvalidEntryPath { path: String },

    #[error("archive contains {path} more than once")]
    DuplicateEntry { path: String },

    #[error("checksum manifest is malformed: {0}")]
    MalformedChecksums(ChecksumDefect),

    #[error("declared file is missing: {path}")]
    Missing { path: String },

    #[error("file is not declared in the checksum manifest: {path}")]
    Unexpected { path: String },

    #[error("file was modified: {path} (expected {expected}, got {actual})")]
    Modified {
        path: String,
        expected: Sha256Digest,
        actual: Sha256Digest,
    },

    #[error("signature file is malformed: {0}")]
    SignatureMalformed(SignatureFileError),

    #[error("signature does not match the checksum manifest")]
    SignatureMismatch,

    #[error("package is unsigned and unsigned packages are not accepted")]
    UnsignedRejected,

    #[error("no trusted key for signer {key_id:?}")]
    UntrustedKey { key_id: Option<String> },

    #[error("package uses the deprecated HMAC signature mode, which is not enabled")]
    LegacyModeDisabled,

    #[error("HMAC tag does not match the checksum manifest")]
    LegacyMacMismatch,

    #[error("itpkg.json is unreadable: {reason}")]
    ManifestUnreadable { reason: String },
}

impl IntegrityFailure {
    pub fn kind(&self) -> FailureKind {
        match self {
            IntegrityFailure::MetadataMissing { .. }
            | IntegrityFailure::InvalidEntryPath { .. }
            | IntegrityFailure::DuplicateEntry { .. }
            | IntegrityFailure::MalformedChecksums(_)
            | IntegrityFailure::ManifestUnreadable { .. } => FailureKind::Structural,
            IntegrityFailure::Missing { .. } => FailureKind::Missing,
            IntegrityFailure::Unexpected { .. } => FailureKind::Unexpected,
            IntegrityFailure::Modified { .. } => FailureKind::Modified,
            IntegrityFailure::SignatureMalformed(_)
            | IntegrityFailure::SignatureMismatch
            | IntegrityFailure::UnsignedRejected
            | IntegrityFailure::UntrustedKey { .. }
            | IntegrityFailure::LegacyModeDisabled
            | IntegrityFailure::LegacyMacMismatch => FailureKind::Signature,
        }
    }
}

/// The package cannot be trusted.
#[derive(Error, Debug)]
pub enum IntegrityError {
    #[error("failed to read package {path}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("package failed integrity verification with {} failure(s)", .failures.len())]
    Rejected { failures: Vec<IntegrityFailure> },
}

impl IntegrityError {
    /// All recorded failures (empty when the package could not be read at all).
    pub fn failures(&self) -> &[IntegrityFailure] {
        match self {
            IntegrityError::Rejected { failures } => failures,
            IntegrityError::Unreadable { .. } => &[],
        }
    }

    /// Whether any failure of the given kind was recorded.
    pub fn has_kind(&self, kind: FailureKind) -> bool {
        self.failures().iter().any(|f| f.kind() == kind)
    }
}

/// Extraction stopped at an offending entry.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("archive entry escapes the destination: {entry}")]
    PathEscape { entry: String },

    #[error("failed to read archive {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure of the install flow.
#[derive(Error, Debug)]
pub enum InstallError {
    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error("failed to stage install in {path}")]
    Stage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to move install into place at {path}")]
    Replace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write install record {path}")]
    Record {
        path: PathBuf,
        #[source]
        source: itpkg_common::Error,
    },
}
