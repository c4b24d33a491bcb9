//! Common utilities and types shared across itpkg crates.

pub mod error;
pub mod hash;

pub use error::{Error, Result};
