//! Manifest types for `itpkg.json`.

use crate::policy::Policies;
use crate::schema;
use jsonschema::JSONSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use thiserror::Error;

/// File name of the package manifest at the package root.
pub const MANIFEST_FILE: &str = "itpkg.json";

/// Current format-version tag written by scaffolding.
pub const DEFAULT_FORMAT_VERSION: &str = "0.1";

/// Whether a package has an entry point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageKind {
    #[default]
    App,
    Lib,
}

/// The itpkg.json file - package metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Scoped identifier, e.g. `@scope/name`.
    #[serde(default)]
    pub name: String,
    /// Semantic version string.
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Relative path of the entry file; required for apps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<String>,
    /// Package kind; absent means app.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<PackageKind>,
    /// Compatibility tag of the packaged workflow format.
    #[serde(rename = "itmlVersion", default)]
    pub format_version: String,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policies: Option<Policies>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

/// Optional metadata block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<SignatureMeta>,
}

/// Which key signed the package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureMeta {
    pub algorithm: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
}

/// Error loading a manifest document.
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Failed to read itpkg.json: {0}")]
    Io(#[from] std::io::Error),

    #[error("itpkg.json is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("itpkg.json does not match the schema: {}", .0.join("; "))]
    Schema(Vec<String>),
}

impl Manifest {
    /// A minimal manifest with deny-all policies.
    pub fn new(name: impl Into<String>, version: impl Into<String>, kind: PackageKind) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: String::new(),
            entry: None,
            kind: Some(kind),
            format_version: DEFAULT_FORMAT_VERSION.to_string(),
            capabilities: BTreeSet::new(),
            policies: Some(Policies::deny_all()),
            meta: None,
        }
    }

    /// Effective kind (app when absent).
    pub fn kind(&self) -> PackageKind {
        self.kind.unwrap_or_default()
    }

    pub fn is_app(&self) -> bool {
        self.kind() == PackageKind::App
    }

    /// Key identifier recorded at signing time, if any.
    pub fn key_id(&self) -> Option<&str> {
        self.meta
            .as_ref()
            .and_then(|m| m.signature.as_ref())
            .and_then(|s| s.key_id.as_deref())
    }

    /// Record the signing algorithm and key identifier.
    pub fn set_signature_meta(&mut self, algorithm: &str, key_id: Option<String>) {
        self.meta.get_or_insert_with(Meta::default).signature = Some(SignatureMeta {
            algorithm: algorithm.to_string(),
            key_id,
        });
    }

    /// Parse a manifest, checking it against the JSON schema first so every
    /// shape violation is reported together.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ManifestError> {
        let value: serde_json::Value = serde_json::from_slice(bytes)?;
        check_schema(&value)?;
        Ok(serde_json::from_value(value)?)
    }

    /// Load the manifest from a package directory.
    pub fn load(package_dir: &Path) -> Result<Self, ManifestError> {
        let bytes = std::fs::read(package_dir.join(MANIFEST_FILE))?;
        Self::from_slice(&bytes)
    }

    /// Canonical serialization written into archives.
    pub fn to_canonical_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }
}

fn check_schema(value: &serde_json::Value) -> Result<(), ManifestError> {
    let schema_value = schema::manifest_schema();
    let compiled = JSONSchema::compile(&schema_value)
        .map_err(|e| ManifestError::Schema(vec![e.to_string()]))?;

    let validation = compiled.validate(value);
    if let Err(errors) = validation {
        let messages = errors
            .map(|error| format!("{} at {}", error, error.instance_path))
            .collect();
        return Err(ManifestError::Schema(messages));
    }
    Ok(())
}
