//! Record written after a verified installation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// File name of the install record at the root of an installed package.
pub const INSTALL_RECORD_FILE: &str = ".installed.json";

/// What was installed, from where, and the archive digest for later drift checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallRecord {
    pub name: String,
    pub version: String,
    /// Locator of the archive (path or URL) as given by the caller.
    pub source: String,
    /// SHA-256 of the archive bytes that were installed.
    pub sha256: String,
    pub installed_at: DateTime<Utc>,
}
