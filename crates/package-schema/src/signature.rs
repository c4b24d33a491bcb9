//! The `SIGNATURE` file.

use thiserror::Error;

/// Literal marker written when a package was explicitly built unsigned.
pub const UNSIGNED_MARKER: &str = "UNSIGNED";

/// Prefix of the deprecated HMAC-SHA256 signature form.
pub const LEGACY_MAC_PREFIX: &str = "hmac-sha256:";

/// Contents of a signature file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signature {
    /// Ed25519 signature over the checksum manifest bytes.
    Ed25519([u8; 64]),
    /// Deprecated symmetric HMAC-SHA256 tag over the checksum manifest bytes.
    LegacyMac([u8; 32]),
    /// Explicit opt-out of signing.
    Unsigned,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureFileError {
    #[error("signature file is empty")]
    Empty,

    #[error("signature is not valid hex")]
    InvalidHex,

    #[error("signature has {actual} bytes, expected {expected}")]
    WrongLength { expected: usize, actual: usize },
}

impl Signature {
    /// Parse a signature file. Ed25519 signatures may be hex-encoded or the
    /// raw 64 bytes.
    pub fn parse(bytes: &[u8]) -> Result<Self, SignatureFileError> {
        if bytes.is_empty() {
            return Err(SignatureFileError::Empty);
        }
        if let Ok(text) = std::str::from_utf8(bytes) {
            let text = text.trim();
            if text == UNSIGNED_MARKER {
                return Ok(Signature::Unsigned);
            }
            if let Some(tag) = text.strip_prefix(LEGACY_MAC_PREFIX) {
                return decode_hex::<32>(tag).map(Signature::LegacyMac);
            }
            if text.len() == 128 {
                return decode_hex::<64>(text).map(Signature::Ed25519);
            }
        }
        match <[u8; 64]>::try_from(bytes) {
            Ok(raw) => Ok(Signature::Ed25519(raw)),
            Err(_) => Err(SignatureFileError::WrongLength {
                expected: 64,
                actual: bytes.len(),
            }),
        }
    }

    /// Serialized file contents.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Signature::Ed25519(sig) => hex::encode(sig).into_bytes(),
            Signature::LegacyMac(tag) => format!("{LEGACY_MAC_PREFIX}{}", hex::encode(tag)).into_bytes(),
            Signature::Unsigned => UNSIGNED_MARKER.as_bytes().to_vec(),
        }
    }

    /// Algorithm identifier recorded in manifest metadata.
    pub fn algorithm(&self) -> &'static str {
        match self {
            Signature::Ed25519(_) => "ed25519",
            Signature::LegacyMac(_) => "hmac-sha256",
            Signature::Unsigned => "none",
        }
    }

    pub fn is_unsigned(&self) -> bool {
        matches!(self, Signature::Unsigned)
    }
}

fn decode_hex<const N: usize>(text: &str) -> Result<[u8; N], SignatureFileError> {
    let raw = hex::decode(text).map_err(|_| SignatureFileError::InvalidHex)?;
    let actual = raw.len();
    raw.try_into()
        .map_err(|_| SignatureFileError::WrongLength {
            expected: N,
            actual,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_unsigned_marker() {
        assert_eq!(Signature::parse(b"UNSIGNED").unwrap(), Signature::Unsigned);
        assert_eq!(Signature::parse(b"UNSIGNED\n").unwrap(), Signature::Unsigned);
    }

    #[test]
    fn test_parse_hex_and_raw_ed25519() {
        let raw = [0xabu8; 64];
        let from_hex = Signature::parse(hex::encode(raw).as_bytes()).unwrap();
        let from_raw = Signature::parse(&raw).unwrap();
        assert_eq!(from_hex, Signature::Ed25519(raw));
        assert_eq!(from_raw, Signature::Ed25519(raw));
    }

    #[test]
    fn test_ed25519_serializes_as_hex() {
        let sig = Signature::Ed25519([1u8; 64]);
        let bytes = sig.to_bytes();
        assert_eq!(bytes.len(), 128);
        assert_eq!(Signature::parse(&bytes).unwrap(), sig);
    }

    #[test]
    fn test_parse_legacy_mac() {
        let text = format!("{LEGACY_MAC_PREFIX}{}", hex::encode([7u8; 32]));
        assert_eq!(
            Signature::parse(text.as_bytes()).unwrap(),
            Signature::LegacyMac([7u8; 32])
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(Signature::parse(b""), Err(SignatureFileError::Empty));
        assert_eq!(
            Signature::parse(b"unsigned-ish"),
            Err(SignatureFileError::WrongLength {
                expected: 64,
                actual: 12
            })
        );
        let bad_hex = "zz".repeat(64);
        assert_eq!(
            Signature::parse(bad_hex.as_bytes()),
            Err(SignatureFileError::InvalidHex)
        );
    }
}
