//! Explicit configuration passed into build and verify.

use crate::keys::key_id;
use ed25519_dalek::{SigningKey, VerifyingKey};
use std::collections::BTreeMap;

/// Configuration for [`crate::build`].
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Key used to sign the checksum manifest.
    pub signing_key: Option<SigningKey>,
    /// Write the unsigned marker when no key is supplied.
    pub allow_unsigned: bool,
}

impl BuildOptions {
    pub fn signed(key: SigningKey) -> Self {
        Self {
            signing_key: Some(key),
            allow_unsigned: false,
        }
    }

    pub fn unsigned() -> Self {
        Self {
            signing_key: None,
            allow_unsigned: true,
        }
    }
}

/// Public keys trusted to sign packages, indexed by key id.
#[derive(Debug, Clone, Default)]
pub struct TrustStore {
    keys: BTreeMap<String, VerifyingKey>,
}

impl TrustStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trust a key; returns its id.
    pub fn add(&mut self, key: VerifyingKey) -> String {
        let id = key_id(&key);
        self.keys.insert(id.clone(), key);
        id
    }

    pub fn get(&self, key_id: &str) -> Option<&VerifyingKey> {
        self.keys.get(key_id)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl FromIterator<VerifyingKey> for TrustStore {
    fn from_iter<I: IntoIterator<Item = VerifyingKey>>(iter: I) -> Self {
        let mut store = TrustStore::new();
        for key in iter {
            store.add(key);
        }
        store
    }
}

/// Configuration for [`crate::verify`].
#[derive(Clone, Default)]
pub struct VerifyOptions {
    /// Key to verify against regardless of the key id in the manifest.
    pub trusted_key: Option<VerifyingKey>,
    /// Keys resolved through `meta.signature.keyId` when no explicit key is given.
    pub trust_store: TrustStore,
    /// Accept packages carrying the unsigned marker.
    pub allow_unsigned: bool,
    /// Opt-in to the deprecated HMAC-SHA256 mode with this shared key.
    pub legacy_mac_key: Option<Vec<u8>>,
}

impl VerifyOptions {
    pub fn with_trusted_key(key: VerifyingKey) -> Self {
        Self {
            trusted_key: Some(key),
            ..Default::default()
        }
    }

    pub fn accept_unsigned() -> Self {
        Self {
            allow_unsigned: true,
            ..Default::default()
        }
    }
}

impl std::fmt::Debug for VerifyOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerifyOptions")
            .field("trusted_key", &self.trusted_key.as_ref().map(key_id))
            .field("trust_store", &self.trust_store.len())
            .field("allow_unsigned", &self.allow_unsigned)
            .field("legacy_mac_key", &self.legacy_mac_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trust_store_lookup() {
        let a = SigningKey::from_bytes(&[1u8; 32]).verifying_key();
        let b = SigningKey::from_bytes(&[2u8; 32]).verifying_key();
        let store: TrustStore = [a, b].into_iter().collect();

        assert_eq!(store.len(), 2);
        assert_eq!(store.get(&key_id(&a)), Some(&a));
        assert!(store.get("0000000000000000").is_none());
    }

    #[test]
    fn test_debug_hides_mac_key() {
        let options = VerifyOptions {
            legacy_mac_key: Some(b"secret".to_vec()),
            ..Default::default()
        };
        let rendered = format!("{options:?}");
        assert!(!rendered.contains("secret"));
    }
}
