//! Signing and signature checks over checksum manifest bytes.

use crate::error::SigningError;
use ed25519_dalek::{Signer as _, SigningKey, Verifier as _, VerifyingKey};
use hmac::{Hmac, Mac};
use itpkg_schema::{ChecksumManifest, Signature};
use sha2::Sha256;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// Sign the exact serialized bytes of a checksum manifest.
///
/// Takes the typed manifest so a partial or unsorted list can never be signed.
pub fn sign(key: &SigningKey, checksums: &ChecksumManifest) -> Signature {
    Signature::Ed25519(key.sign(&checksums.to_bytes()).to_bytes())
}

/// Check an Ed25519 signature over checksum manifest bytes.
pub fn verify_ed25519(key: &VerifyingKey, message: &[u8], signature: &[u8; 64]) -> bool {
    let signature = ed25519_dalek::Signature::from_bytes(signature);
    key.verify(message, &signature).is_ok()
}

/// Compute an HMAC-SHA256 tag over checksum manifest bytes.
#[deprecated(note = "symmetric package signatures are superseded by Ed25519")]
pub fn sign_legacy_mac(
    key: &[u8],
    checksums: &ChecksumManifest,
) -> Result<Signature, SigningError> {
    warn!("Producing a deprecated HMAC-SHA256 package signature");
    let mut mac = new_mac(key)?;
    mac.update(&checksums.to_bytes());
    Ok(Signature::LegacyMac(mac.finalize().into_bytes().into()))
}

/// Constant-time check of an HMAC-SHA256 tag.
///
/// A key the MAC cannot be keyed with never validates a tag.
pub fn verify_legacy_mac(key: &[u8], message: &[u8], tag: &[u8; 32]) -> bool {
    let Ok(mut mac) = new_mac(key) else {
        warn!("Rejecting legacy MAC check with an unusable key");
        return false;
    };
    mac.update(message);
    mac.verify_slice(tag).is_ok()
}

fn new_mac(key: &[u8]) -> Result<HmacSha256, SigningError> {
    <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| SigningError::InvalidMacKey(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use itpkg_schema::{ChecksumEntry, PackagePath};

    fn checksums() -> ChecksumManifest {
        ChecksumManifest::from_entries(vec![ChecksumEntry::new(
            PackagePath::parse("intents/hello.itml").unwrap(),
            b"intent",
        )])
        .unwrap()
    }

    #[test]
    fn test_sign_and_verify() {
        let key = SigningKey::from_bytes(&[7u8; 32]);
        let manifest = checksums();
        let Signature::Ed25519(sig) = sign(&key, &manifest) else {
            panic!("expected an ed25519 signature");
        };
        assert!(verify_ed25519(&key.verifying_key(), &manifest.to_bytes(), &sig));
    }

    #[test]
    fn test_signing_is_deterministic() {
        let key = SigningKey::from_bytes(&[7u8; 32]);
        assert_eq!(sign(&key, &checksums()), sign(&key, &checksums()));
    }

    #[test]
    fn test_wrong_key_fails() {
        let key = SigningKey::from_bytes(&[7u8; 32]);
        let other = SigningKey::from_bytes(&[8u8; 32]);
        let manifest = checksums();
        let Signature::Ed25519(sig) = sign(&key, &manifest) else {
            panic!("expected an ed25519 signature");
        };
        assert!(!verify_ed25519(&other.verifying_key(), &manifest.to_bytes(), &sig));
    }

    #[test]
    #[allow(deprecated)]
    fn test_legacy_mac_roundtrip() {
        let manifest = checksums();
        let Signature::LegacyMac(tag) = sign_legacy_mac(b"shared", &manifest).unwrap() else {
            panic!("expected a legacy tag");
        };
        assert!(verify_legacy_mac(b"shared", &manifest.to_bytes(), &tag));
        assert!(!verify_legacy_mac(b"other", &manifest.to_bytes(), &tag));
    }

    #[test]
    #[allow(deprecated)]
    fn test_legacy_mac_accepts_any_key_length() {
        let manifest = checksums();
        for key in [&b""[..], &[9u8; 200][..]] {
            let Signature::LegacyMac(tag) = sign_legacy_mac(key, &manifest).unwrap() else {
                panic!("expected a legacy tag");
            };
            assert!(verify_legacy_mac(key, &manifest.to_bytes(), &tag));
        }
    }
}
