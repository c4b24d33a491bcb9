//! Package verification: checksum structure, per-file digests, signature.

use crate::archive::{read_archive, ContentSource};
use crate::error::{IntegrityError, IntegrityFailure};
use crate::keys::key_id;
use crate::options::VerifyOptions;
use crate::signer::{verify_ed25519, verify_legacy_mac};
use itpkg_schema::{
    ChecksumManifest, Manifest, Sha256Digest, Signature, CHECKSUM_FILE, INSTALL_RECORD_FILE,
    MANIFEST_FILE, SIGNATURE_FILE,
};
use std::path::Path;
use tracing::{debug, info, warn};

/// Who vouched for a verified package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignerIdentity {
    Ed25519 { key_id: String },
    LegacyMac,
    Unsigned,
}

/// Conditions the caller opted into that should still be surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyNotice {
    UnsignedAccepted,
    LegacyMacUsed,
}

/// A package that passed every check.
#[derive(Debug, Clone)]
pub struct Verified {
    pub manifest: Manifest,
    pub signer: SignerIdentity,
    pub entries: ChecksumManifest,
    pub notices: Vec<VerifyNotice>,
}

/// Metadata files as declared by a package, before any check.
struct DeclaredPackage {
    manifest: Manifest,
    checksum_bytes: Vec<u8>,
    checksums: ChecksumManifest,
    signature: Signature,
}

impl DeclaredPackage {
    fn from_source(
        source: &dyn ContentSource,
        failures: &mut Vec<IntegrityFailure>,
    ) -> Result<Option<Self>, IntegrityError> {
        let manifest_bytes = source.read(MANIFEST_FILE)?;
        let checksum_bytes = source.read(CHECKSUM_FILE)?;
        let signature_bytes = source.read(SIGNATURE_FILE)?;

        let manifest = match manifest_bytes {
            None => {
                failures.push(IntegrityFailure::MetadataMissing {
                    file: MANIFEST_FILE,
                });
                None
            }
            Some(bytes) => match Manifest::from_slice(&bytes) {
                Ok(manifest) => Some(manifest),
                Err(e) => {
                    failures.push(IntegrityFailure::ManifestUnreadable {
                        reason: e.to_string(),
                    });
                    None
                }
            },
        };

        let checksums = match &checksum_bytes {
            None => {
                failures.push(IntegrityFailure::MetadataMissing {
                    file: CHECKSUM_FILE,
                });
                None
            }
            Some(bytes) => match ChecksumManifest::parse(bytes) {
                Ok(checksums) => Some(checksums),
                Err(defects) => {
                    failures.extend(defects.into_iter().map(IntegrityFailure::MalformedChecksums));
                    None
                }
            },
        };

        let signature = match signature_bytes {
            None => {
                failures.push(IntegrityFailure::MetadataMissing {
                    file: SIGNATURE_FILE,
                });
                None
            }
            Some(bytes) => match Signature::parse(&bytes) {
                Ok(signature) => Some(signature),
                Err(e) => {
                    failures.push(IntegrityFailure::SignatureMalformed(e));
                    None
                }
            },
        };

        Ok(match (manifest, checksum_bytes, checksums, signature) {
            (Some(manifest), Some(checksum_bytes), Some(checksums), Some(signature)) => {
                Some(Self {
                    manifest,
                    checksum_bytes,
                    checksums,
                    signature,
                })
            }
            _ => None,
        })
    }
}

/// Verify a package from any content source.
///
/// Structural problems are reported before any digest or signature work.
/// Digest and signature failures are collected together; any failure makes
/// the whole package untrusted.
pub fn verify(
    source: &dyn ContentSource,
    options: &VerifyOptions,
) -> Result<Verified, IntegrityError> {
    info!("Verifying package {}", source.locator());

    let listing = source.listing()?;
    let mut failures = listing.failures;
    let declared = DeclaredPackage::from_source(source, &mut failures)?;

    let declared = match declared {
        Some(declared) if failures.is_empty() => declared,
        _ => {
            debug!("Structural check failed with {} failure(s)", failures.len());
            return Err(IntegrityError::Rejected { failures });
        }
    };

    check_digests(source, &listing.files, &declared.checksums, &mut failures)?;

    let mut notices = Vec::new();
    let signer = check_signature(&declared, options, &mut failures, &mut notices);

    match signer {
        Some(signer) if failures.is_empty() => {
            info!(
                "Verified {}@{} ({} files)",
                declared.manifest.name,
                declared.manifest.version,
                declared.checksums.len()
            );
            Ok(Verified {
                manifest: declared.manifest,
                signer,
                entries: declared.checksums,
                notices,
            })
        }
        _ => {
            warn!(
                "Package {} failed verification with {} failure(s)",
                source.locator(),
                failures.len()
            );
            Err(IntegrityError::Rejected { failures })
        }
    }
}

/// Read an archive from disk and verify it.
pub fn verify_archive(path: &Path, options: &VerifyOptions) -> Result<Verified, IntegrityError> {
    let contents = read_archive(path)?;
    verify(&contents, options)
}

fn check_digests(
    source: &dyn ContentSource,
    present: &[itpkg_schema::PackagePath],
    checksums: &ChecksumManifest,
    failures: &mut Vec<IntegrityFailure>,
) -> Result<(), IntegrityError> {
    for entry in checksums.entries() {
        match source.read(entry.path.as_str())? {
            None => failures.push(IntegrityFailure::Missing {
                path: entry.path.to_string(),
            }),
            Some(content) => {
                let actual = Sha256Digest::of(&content);
                if actual != entry.digest {
                    failures.push(IntegrityFailure::Modified {
                        path: entry.path.to_string(),
                        expected: entry.digest,
                        actual,
                    });
                }
            }
        }
    }

    for path in present {
        let name = path.as_str();
        if [CHECKSUM_FILE, SIGNATURE_FILE, INSTALL_RECORD_FILE].contains(&name) {
            continue;
        }
        if !checksums.contains(name) {
            failures.push(IntegrityFailure::Unexpected {
                path: name.to_string(),
            });
        }
    }
    Ok(())
}

fn check_signature(
    declared: &DeclaredPackage,
    options: &VerifyOptions,
    failures: &mut Vec<IntegrityFailure>,
    notices: &mut Vec<VerifyNotice>,
) -> Option<SignerIdentity> {
    let message = declared.checksum_bytes.as_slice();
    match &declared.signature {
        Signature::Unsigned => {
            if options.allow_unsigned {
                warn!("Accepting unsigned package {}", declared.manifest.name);
                notices.push(VerifyNotice::UnsignedAccepted);
                Some(SignerIdentity::Unsigned)
            } else {
                failures.push(IntegrityFailure::UnsignedRejected);
                None
            }
        }
        Signature::LegacyMac(tag) => match &options.legacy_mac_key {
            None => {
                failures.push(IntegrityFailure::LegacyModeDisabled);
                None
            }
            Some(mac_key) => {
                warn!("Package uses deprecated HMAC-SHA256 signature; re-sign with an Ed25519 key");
                notices.push(VerifyNotice::LegacyMacUsed);
                if verify_legacy_mac(mac_key, message, tag) {
                    Some(SignerIdentity::LegacyMac)
                } else {
                    failures.push(IntegrityFailure::LegacyMacMismatch);
                    None
                }
            }
        },
        Signature::Ed25519(signature) => {
            let declared_id = declared.manifest.key_id();
            let key = options
                .trusted_key
                .or_else(|| declared_id.and_then(|id| options.trust_store.get(id).copied()));
            let Some(key) = key else {
                failures.push(IntegrityFailure::UntrustedKey {
                    key_id: declared_id.map(str::to_string),
                });
                return None;
            };
            if verify_ed25519(&key, message, signature) {
                Some(SignerIdentity::Ed25519 {
                    key_id: key_id(&key),
                })
            } else {
                failures.push(IntegrityFailure::SignatureMismatch);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::TreeSource;
    use crate::error::FailureKind;
    use crate::signer::sign;
    use ed25519_dalek::SigningKey;
    use itpkg_schema::{ChecksumEntry, PackageKind, PackagePath};
    use std::fs;
    use tempfile::tempdir;

    fn key() -> SigningKey {
        SigningKey::from_bytes(&[5u8; 32])
    }

    /// Lay out an extracted package by hand.
    fn write_package(root: &Path, files: &[(&str, &[u8])], signature: Option<&Signature>) {
        let mut manifest = Manifest::new("@scope/demo", "0.1.0", PackageKind::Lib);
        manifest.set_signature_meta("ed25519", Some(key_id(&key().verifying_key())));
        let manifest_bytes = manifest.to_canonical_bytes().unwrap();
        fs::write(root.join(MANIFEST_FILE), &manifest_bytes).unwrap();

        let mut entries = vec![ChecksumEntry::new(
            PackagePath::parse(MANIFEST_FILE).unwrap(),
            &manifest_bytes,
        )];
        for (name, content) in files {
            let target = root.join(name);
            fs::create_dir_all(target.parent().unwrap()).unwrap();
            fs::write(&target, content).unwrap();
            entries.push(ChecksumEntry::new(PackagePath::parse(name).unwrap(), content));
        }
        let checksums = ChecksumManifest::from_entries(entries).unwrap();
        fs::write(root.join(CHECKSUM_FILE), checksums.to_bytes()).unwrap();

        let signature = signature
            .cloned()
            .unwrap_or_else(|| sign(&key(), &checksums));
        fs::write(root.join(SIGNATURE_FILE), signature.to_bytes()).unwrap();
    }

    fn trusting() -> VerifyOptions {
        VerifyOptions::with_trusted_key(key().verifying_key())
    }

    #[test]
    fn test_verify_tree() {
        let dir = tempdir().unwrap();
        write_package(dir.path(), &[("intents/a.itml", b"a")], None);

        let verified = verify(&TreeSource::new(dir.path()), &trusting()).unwrap();
        assert_eq!(verified.manifest.name, "@scope/demo");
        assert_eq!(verified.entries.len(), 2);
        assert!(verified.notices.is_empty());
        assert_eq!(
            verified.signer,
            SignerIdentity::Ed25519 {
                key_id: key_id(&key().verifying_key())
            }
        );
    }

    #[test]
    fn test_trust_store_resolves_key_id() {
        let dir = tempdir().unwrap();
        write_package(dir.path(), &[("intents/a.itml", b"a")], None);

        let mut options = VerifyOptions::default();
        options.trust_store.add(key().verifying_key());
        assert!(verify(&TreeSource::new(dir.path()), &options).is_ok());

        let err = verify(&TreeSource::new(dir.path()), &VerifyOptions::default()).unwrap_err();
        assert!(matches!(
            err.failures(),
            [IntegrityFailure::UntrustedKey { key_id: Some(_) }]
        ));
    }

    #[test]
    fn test_collects_all_digest_failures() {
        let dir = tempdir().unwrap();
        write_package(
            dir.path(),
            &[("intents/a.itml", b"a"), ("intents/b.itml", b"b")],
            None,
        );
        fs::write(dir.path().join("intents/a.itml"), "tampered").unwrap();
        fs::remove_file(dir.path().join("intents/b.itml")).unwrap();
        fs::write(dir.path().join("extra.txt"), "extra").unwrap();

        let err = verify(&TreeSource::new(dir.path()), &trusting()).unwrap_err();
        assert!(err.has_kind(FailureKind::Modified));
        assert!(err.has_kind(FailureKind::Missing));
        assert!(err.has_kind(FailureKind::Unexpected));
        assert!(!err.has_kind(FailureKind::Signature));
    }

    #[test]
    fn test_install_record_is_not_unexpected() {
        let dir = tempdir().unwrap();
        write_package(dir.path(), &[("intents/a.itml", b"a")], None);
        fs::write(dir.path().join(INSTALL_RECORD_FILE), "{}").unwrap();
        assert!(verify(&TreeSource::new(dir.path()), &trusting()).is_ok());
    }

    #[test]
    fn test_missing_metadata_is_structural() {
        let dir = tempdir().unwrap();
        write_package(dir.path(), &[("intents/a.itml", b"a")], None);
        fs::remove_file(dir.path().join(SIGNATURE_FILE)).unwrap();

        let err = verify(&TreeSource::new(dir.path()), &trusting()).unwrap_err();
        assert_eq!(
            err.failures(),
            &[IntegrityFailure::MetadataMissing {
                file: SIGNATURE_FILE
            }]
        );
    }

    #[test]
    fn test_unsigned_gate() {
        let dir = tempdir().unwrap();
        write_package(dir.path(), &[("intents/a.itml", b"a")], Some(&Signature::Unsigned));

        let err = verify(&TreeSource::new(dir.path()), &trusting()).unwrap_err();
        assert_eq!(err.failures(), &[IntegrityFailure::UnsignedRejected]);

        let verified = verify(&TreeSource::new(dir.path()), &VerifyOptions::accept_unsigned()).unwrap();
        assert_eq!(verified.signer, SignerIdentity::Unsigned);
        assert_eq!(verified.notices, vec![VerifyNotice::UnsignedAccepted]);
    }

    #[test]
    #[allow(deprecated)]
    fn test_legacy_mac_requires_opt_in() {
        let dir = tempdir().unwrap();
        write_package(dir.path(), &[("intents/a.itml", b"a")], None);
        let checksums =
            ChecksumManifest::parse(&fs::read(dir.path().join(CHECKSUM_FILE)).unwrap()).unwrap();
        let tag = crate::signer::sign_legacy_mac(b"shared", &checksums).unwrap();
        fs::write(dir.path().join(SIGNATURE_FILE), tag.to_bytes()).unwrap();

        let err = verify(&TreeSource::new(dir.path()), &VerifyOptions::default()).unwrap_err();
        assert_eq!(err.failures(), &[IntegrityFailure::LegacyModeDisabled]);

        let options = VerifyOptions {
            legacy_mac_key: Some(b"shared".to_vec()),
            ..Default::default()
        };
        let verified = verify(&TreeSource::new(dir.path()), &options).unwrap();
        assert_eq!(verified.signer, SignerIdentity::LegacyMac);
        assert_eq!(verified.notices, vec![VerifyNotice::LegacyMacUsed]);

        let wrong = VerifyOptions {
            legacy_mac_key: Some(b"other".to_vec()),
            ..Default::default()
        };
        let err = verify(&TreeSource::new(dir.path()), &wrong).unwrap_err();
        assert_eq!(err.failures(), &[IntegrityFailure::LegacyMacMismatch]);
    }

    #[test]
    fn test_unsorted_checksums_rejected_before_signature() {
        let dir = tempdir().unwrap();
        write_package(
            dir.path(),
            &[("intents/a.itml", b"a"), ("intents/b.itml", b"b")],
            None,
        );
        let text = fs::read_to_string(dir.path().join(CHECKSUM_FILE)).unwrap();
        let mut lines: Vec<&str> = text.lines().collect();
        lines.reverse();
        fs::write(dir.path().join(CHECKSUM_FILE), format!("{}\n", lines.join("\n"))).unwrap();

        let err = verify(&TreeSource::new(dir.path()), &trusting()).unwrap_err();
        assert!(err.has_kind(FailureKind::Structural));
        assert!(!err.has_kind(FailureKind::Signature));
    }
}
