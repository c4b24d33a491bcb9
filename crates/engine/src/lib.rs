//! itpkg engine - building, signing, verifying and extracting package archives.
//!
//! The entry points are [`build`], [`verify`], [`extract`] and the
//! [`install`] flow built on top of them. Configuration is passed in
//! explicitly through [`BuildOptions`] and [`VerifyOptions`].

pub mod archive;
pub mod builder;
pub mod error;
pub mod extractor;
pub mod install;
pub mod keys;
pub mod options;
pub mod scaffold;
pub mod signer;
pub mod verifier;

pub use archive::{read_archive, ArchiveContents, ContentSource, Listing, TreeSource};
pub use builder::{build, package_file_name, sanitize_package_name, BuiltArchive};
pub use error::{
    BuildError, ExtractionError, FailureKind, InstallError, IntegrityError, IntegrityFailure,
    SigningError, ValidationError,
};
pub use extractor::{extract, extract_from, ExtractedTree};
pub use install::{install, install_contents};
pub use options::{BuildOptions, TrustStore, VerifyOptions};
pub use scaffold::{init_project, scaffold, InitOptions};
pub use verifier::{verify, verify_archive, SignerIdentity, Verified, VerifyNotice};
