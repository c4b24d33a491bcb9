//! Loading Ed25519 key material supplied by the caller.

use ed25519_dalek::pkcs8::{DecodePrivateKey, DecodePublicKey};
use ed25519_dalek::{SigningKey, VerifyingKey};
use itpkg_common::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Short identifier of a public key: the first 16 hex characters of its
/// SHA-256 digest.
pub fn key_id(key: &VerifyingKey) -> String {
    let digest = itpkg_common::hash::sha256_bytes(key.as_bytes());
    digest[..16].to_string()
}

/// Expand a leading `~/` against the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

/// Parse a signing key: hex of a 32-byte seed or 64-byte keypair, or a
/// PKCS#8 PEM document.
pub fn parse_signing_key(material: &str) -> Result<SigningKey> {
    let text = material.trim();
    if text.starts_with("-----BEGIN") {
        return SigningKey::from_pkcs8_pem(text)
            .map_err(|e| Error::InvalidKey(format!("invalid PKCS#8 private key: {e}")));
    }
    let raw = hex::decode(text)
        .map_err(|_| Error::InvalidKey("private key is neither hex nor PEM".to_string()))?;
    match raw.len() {
        32 => {
            let seed: [u8; 32] = raw
                .as_slice()
                .try_into()
                .map_err(|_| Error::InvalidKey("bad seed length".to_string()))?;
            Ok(SigningKey::from_bytes(&seed))
        }
        64 => {
            let pair: [u8; 64] = raw
                .as_slice()
                .try_into()
                .map_err(|_| Error::InvalidKey("bad keypair length".to_string()))?;
            SigningKey::from_keypair_bytes(&pair)
                .map_err(|_| Error::InvalidKey("keypair halves do not match".to_string()))
        }
        n => Err(Error::InvalidKey(format!(
            "expected a 32-byte seed or 64-byte keypair, got {n} bytes"
        ))),
    }
}

/// Parse a public key: hex of 32 bytes or an SPKI PEM document.
pub fn parse_verifying_key(material: &str) -> Result<VerifyingKey> {
    let text = material.trim();
    if text.starts_with("-----BEGIN") {
        return VerifyingKey::from_public_key_pem(text)
            .map_err(|e| Error::InvalidKey(format!("invalid public key PEM: {e}")));
    }
    let raw = hex::decode(text)
        .map_err(|_| Error::InvalidKey("public key is neither hex nor PEM".to_string()))?;
    let bytes: [u8; 32] = raw
        .as_slice()
        .try_into()
        .map_err(|_| Error::InvalidKey(format!("public key must be 32 bytes, got {}", raw.len())))?;
    VerifyingKey::from_bytes(&bytes)
        .map_err(|_| Error::InvalidKey("not a valid Ed25519 public key".to_string()))
}

fn read_key_file(path: &Path) -> Result<String> {
    let path = expand_home(path);
    debug!("Loading key material from {:?}", path);
    std::fs::read_to_string(&path).map_err(|source| Error::KeyRead { path, source })
}

pub fn load_signing_key(path: &Path) -> Result<SigningKey> {
    parse_signing_key(&read_key_file(path)?)
}

pub fn load_verifying_key(path: &Path) -> Result<VerifyingKey> {
    parse_verifying_key(&read_key_file(path)?)
}

/// Load raw bytes of a symmetric key for the deprecated HMAC mode. Hex
/// content is decoded, anything else is used verbatim.
pub fn load_mac_key(path: &Path) -> Result<Vec<u8>> {
    let path = expand_home(path);
    let raw = std::fs::read(&path).map_err(|source| Error::KeyRead { path, source })?;
    let decoded = std::str::from_utf8(&raw)
        .ok()
        .and_then(|text| hex::decode(text.trim()).ok());
    Ok(decoded.unwrap_or(raw))
}
