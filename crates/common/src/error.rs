//! Common error types for itpkg.

use std::path::PathBuf;
use thiserror::Error;

/// Common error type for itpkg operations outside the integrity engine proper
/// (key loading, scaffolding, record writing).
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to read key file {path}")]
    KeyRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Scaffold error: {0}")]
    Scaffold(String),
}

/// Result type alias using common Error.
pub type Result<T> = std::result::Result<T, Error>;
