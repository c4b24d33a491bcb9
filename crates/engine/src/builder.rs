//! Archive builder: validate, enumerate, checksum, sign, write.

use crate::archive::{append_dir, append_file};
use crate::error::{BuildError, SigningError, ValidationError};
use crate::keys::key_id;
use crate::options::BuildOptions;
use crate::signer::sign;
use flate2::{Compression, GzBuilder};
use itpkg_schema::{
    check_scanned_layout, scan_tree, validate_manifest, ChecksumEntry, ChecksumManifest, EntryKind,
    Manifest, PackagePath, Signature, CHECKSUM_FILE, MANIFEST_FILE, SIGNATURE_FILE,
};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tar::Builder;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Extension of package archives.
pub const ARCHIVE_EXTENSION: &str = "itpkg";

const METADATA_MODE: u32 = 0o644;

/// Mode of the written archive, before the process umask.
const ARCHIVE_MODE: u32 = 0o644;

/// A successfully written archive.
#[derive(Debug, Clone)]
pub struct BuiltArchive {
    pub path: PathBuf,
    pub checksums: ChecksumManifest,
    pub signature: Signature,
    /// SHA-256 of the archive bytes.
    pub sha256: String,
}

/// Reduce a package name to a file-system friendly stem: `@acme/hello`
/// becomes `acme-hello`.
pub fn sanitize_package_name(name: &str) -> String {
    let stem: String = name
        .chars()
        .filter(|c| *c != '@')
        .map(|c| if c == '/' { '-' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    if stem.is_empty() {
        "package".to_string()
    } else {
        stem
    }
}

/// Conventional archive file name for a manifest.
pub fn package_file_name(manifest: &Manifest) -> String {
    format!(
        "{}-{}.{ARCHIVE_EXTENSION}",
        sanitize_package_name(&manifest.name),
        manifest.version
    )
}

/// Build a package archive from `source` into the file `destination`.
///
/// Nothing is written to `destination` unless the whole build succeeds.
pub fn build(
    source: &Path,
    destination: &Path,
    options: &BuildOptions,
) -> Result<BuiltArchive, BuildError> {
    info!("Building package from {:?}", source);

    let mut manifest = Manifest::load(source).map_err(ValidationError::from)?;

    let root = source.canonicalize().map_err(|source_err| BuildError::ReadSource {
        path: source.to_path_buf(),
        source: source_err,
    })?;
    let excluded: Vec<PathBuf> = resolved_destination(destination).into_iter().collect();
    let scan = scan_tree(&root, &excluded);

    let mut report = validate_manifest(&manifest, source);
    report.merge(check_scanned_layout(&root, &manifest, &scan));
    for issue in &report.warnings {
        warn!("{}", issue);
    }
    for issue in &report.infos {
        debug!("{}", issue);
    }
    if !report.is_valid() {
        return Err(ValidationError::Invalid(report).into());
    }

    if options.signing_key.is_none() && !options.allow_unsigned {
        return Err(SigningError::KeyRequired.into());
    }

    match &options.signing_key {
        Some(key) => {
            manifest.set_signature_meta("ed25519", Some(key_id(&key.verifying_key())));
        }
        None => {
            if let Some(meta) = manifest.meta.as_mut() {
                meta.signature = None;
            }
        }
    }
    let manifest_bytes = manifest.to_canonical_bytes()?;

    let parent = destination
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let write_err = |source| BuildError::Write {
        path: destination.to_path_buf(),
        source,
    };
    fs::create_dir_all(parent).map_err(write_err)?;
    let staged = staging_file(parent).map_err(write_err)?;

    let encoder = GzBuilder::new()
        .mtime(0)
        .write(staged, Compression::default());
    let mut archive = Builder::new(encoder);

    let mut entries = Vec::new();
    append_file(&mut archive, MANIFEST_FILE, METADATA_MODE, &manifest_bytes).map_err(write_err)?;
    entries.push(ChecksumEntry::new(PackagePath::manifest(), &manifest_bytes));

    for item in &scan.entries {
        match item.kind {
            EntryKind::Directory => {
                append_dir(&mut archive, item.path.as_str(), item.mode).map_err(write_err)?;
            }
            EntryKind::File => {
                let content = fs::read(&item.source).map_err(|e| BuildError::ReadSource {
                    path: item.source.clone(),
                    source: e,
                })?;
                debug!("Adding {} ({} bytes)", item.path, content.len());
                append_file(&mut archive, item.path.as_str(), item.mode, &content)
                    .map_err(write_err)?;
                entries.push(ChecksumEntry::new(item.path.clone(), &content));
            }
        }
    }

    let checksums = ChecksumManifest::from_entries(entries).map_err(BuildError::Checksums)?;
    let checksum_bytes = checksums.to_bytes();
    append_file(&mut archive, CHECKSUM_FILE, METADATA_MODE, &checksum_bytes).map_err(write_err)?;

    let signature = match &options.signing_key {
        Some(key) => sign(key, &checksums),
        None => {
            warn!("Writing unsigned package {}", manifest.name);
            Signature::Unsigned
        }
    };
    append_file(&mut archive, SIGNATURE_FILE, METADATA_MODE, &signature.to_bytes())
        .map_err(write_err)?;

    let encoder = archive.into_inner().map_err(write_err)?;
    let mut staged = encoder.finish().map_err(write_err)?;
    staged.flush().map_err(write_err)?;
    staged
        .persist(destination)
        .map_err(|e| write_err(e.error))?;

    let sha256 = itpkg_common::hash::sha256_file(destination).map_err(write_err)?;
    info!(
        "Wrote {:?} ({} files, sha256 {})",
        destination,
        checksums.len(),
        sha256
    );

    Ok(BuiltArchive {
        path: destination.to_path_buf(),
        checksums,
        signature,
        sha256,
    })
}

/// Staging file next to the destination so the final rename stays on one
/// file system. Created with the archive's final mode; tempfile defaults to 0600.
fn staging_file(dir: &Path) -> std::io::Result<NamedTempFile> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(".itpkg-").suffix(".tmp");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(fs::Permissions::from_mode(ARCHIVE_MODE));
    }
    builder.tempfile_in(dir)
}

/// Absolute location of the output archive, when its directory already
/// exists, so the tree walk can skip it.
fn resolved_destination(destination: &Path) -> Option<PathBuf> {
    let parent = destination
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = destination.file_name()?;
    let parent = parent.canonicalize().ok()?;
    Some(parent.join(file_name))
}
