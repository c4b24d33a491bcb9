//! itpkg - build, sign, verify and install intent packages.

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use itpkg_engine::keys::{load_mac_key, load_signing_key, load_verifying_key};
use itpkg_engine::{
    build, install, package_file_name, read_archive, verify, BuildOptions, InitOptions,
    IntegrityError, SignerIdentity, TreeSource, VerifyNotice, VerifyOptions,
};
use itpkg_schema::{check_layout, validate_manifest, Manifest, ValidationReport, MANIFEST_FILE};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable consulted when `--sign-key` is not given.
const SIGN_KEY_ENV: &str = "INTENT_SIGN_KEY";

#[derive(Parser)]
#[command(name = "itpkg")]
#[command(author, version, about = "Build, sign, verify and install intent packages")]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format for reports
    #[arg(long, global = true, value_enum, default_value_t = Format::Text)]
    format: Format,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Args)]
struct TrustArgs {
    /// Public key (hex or PEM) to verify the signature against
    #[arg(long)]
    public_key: Option<PathBuf>,

    /// Additional trusted public keys, resolved through the manifest key id
    #[arg(long = "trust")]
    trust: Vec<PathBuf>,

    /// Accept packages built with --unsigned
    #[arg(long)]
    allow_unsigned: bool,

    /// Shared key enabling the deprecated HMAC-SHA256 signature mode
    #[arg(long)]
    legacy_mac_key: Option<PathBuf>,
}

impl TrustArgs {
    fn into_options(self) -> anyhow::Result<VerifyOptions> {
        let mut options = VerifyOptions {
            allow_unsigned: self.allow_unsigned,
            ..Default::default()
        };
        if let Some(path) = self.public_key {
            options.trusted_key = Some(
                load_verifying_key(&path)
                    .with_context(|| format!("Failed to load public key {:?}", path))?,
            );
        }
        for path in self.trust {
            let key = load_verifying_key(&path)
                .with_context(|| format!("Failed to load trusted key {:?}", path))?;
            let id = options.trust_store.add(key);
            info!("Trusting key {} from {:?}", id, path);
        }
        if let Some(path) = self.legacy_mac_key {
            warn!("Legacy HMAC-SHA256 verification enabled");
            options.legacy_mac_key = Some(
                load_mac_key(&path).with_context(|| format!("Failed to load MAC key {:?}", path))?,
            );
        }
        Ok(options)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new intent project
    Init {
        /// Project name; creates a new directory when given
        name: Option<String>,

        /// Create an app package with a project.app.itml entry point
        #[arg(long)]
        app: bool,

        /// Package scope, e.g. @acme
        #[arg(long)]
        scope: Option<String>,

        /// Overwrite an existing itpkg.json
        #[arg(long)]
        force: bool,
    },

    /// Check a package source tree without building it
    Validate {
        /// Package directory
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Build a signed .itpkg archive
    Package {
        /// Package directory, or a file inside it
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Output directory for the archive (default: current directory)
        #[arg(long, short)]
        out: Option<PathBuf>,

        /// Path to an Ed25519 private key (defaults to env INTENT_SIGN_KEY)
        #[arg(long)]
        sign_key: Option<PathBuf>,

        /// Allow creating an unsigned archive
        #[arg(long)]
        unsigned: bool,

        /// Generate itpkg.json if missing
        #[arg(long)]
        scaffold: bool,
    },

    /// Verify an archive or an installed package directory
    Verify {
        /// Archive file or extracted package directory
        path: PathBuf,

        #[command(flatten)]
        trust: TrustArgs,
    },

    /// Verify and install an archive
    Install {
        /// Archive file
        archive: PathBuf,

        /// Destination folder
        #[arg(long, default_value = "intents")]
        dest: PathBuf,

        #[command(flatten)]
        trust: TrustArgs,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Init {
            name,
            app,
            scope,
            force,
        } => {
            let (dir, name) = match name {
                Some(name) => (PathBuf::from(&name), name),
                None => {
                    let cwd = std::env::current_dir()?;
                    let name = cwd
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    (PathBuf::from("."), name)
                }
            };
            let options = InitOptions { scope, app, force };
            let manifest = itpkg_engine::init_project(&dir, &name, &options)?;
            println!("Initialized {} in {}", manifest.name, dir.display());
        }

        Commands::Validate { path } => {
            let manifest = Manifest::load(&path)
                .with_context(|| format!("Failed to load {MANIFEST_FILE} in {:?}", path))?;
            let mut report = validate_manifest(&manifest, &path);
            report.merge(check_layout(&path, &manifest));
            print_report(&report, cli.format)?;
            if !report.is_valid() {
                bail!("{} validation error(s)", report.errors.len());
            }
        }

        Commands::Package {
            path,
            out,
            sign_key,
            unsigned,
            scaffold,
        } => {
            let (package_dir, default_name) = package_dir(&path)?;

            if !package_dir.join(MANIFEST_FILE).exists() {
                if !scaffold {
                    bail!(
                        "{MANIFEST_FILE} not found in {}\n\nTo generate it automatically, use:\n  itpkg package . --scaffold --unsigned",
                        package_dir.display()
                    );
                }
                let manifest = itpkg_engine::scaffold(&package_dir, &default_name, None)?;
                println!("Created {MANIFEST_FILE} for {}", manifest.name);
            } else if scaffold {
                for dir in itpkg_engine::scaffold::ensure_required_dirs(&package_dir)? {
                    println!("Created directory: {dir}/");
                }
            }

            let sign_key = sign_key.or_else(|| std::env::var_os(SIGN_KEY_ENV).map(PathBuf::from));
            let options = match sign_key {
                Some(path) if !unsigned => BuildOptions::signed(
                    load_signing_key(&path)
                        .with_context(|| format!("Failed to load signing key {:?}", path))?,
                ),
                _ if unsigned => BuildOptions::unsigned(),
                _ => bail!("signing key required (use --sign-key, {SIGN_KEY_ENV}, or --unsigned)"),
            };

            let manifest = Manifest::load(&package_dir)?;
            let out_dir = out.unwrap_or_else(|| PathBuf::from("."));
            let destination = out_dir.join(package_file_name(&manifest));

            info!("Packing {:?}", package_dir);
            let built = match build(&package_dir, &destination, &options) {
                Ok(built) => built,
                Err(itpkg_engine::BuildError::Validation(e)) => {
                    if let Some(report) = e.report() {
                        print_report(report, cli.format)?;
                    }
                    return Err(e.into());
                }
                Err(e) => return Err(e.into()),
            };

            println!("Created {}", built.path.display());
            println!("  files:     {}", built.checksums.len());
            println!("  signature: {}", built.signature.algorithm());
            println!("  sha256:    {}", built.sha256);
        }

        Commands::Verify { path, trust } => {
            let options = trust.into_options()?;
            let result = if path.is_dir() {
                verify(&TreeSource::new(&path), &options)
            } else {
                read_archive(&path).and_then(|contents| verify(&contents, &options))
            };
            match result {
                Ok(verified) => {
                    print_verified(&verified, cli.format)?;
                }
                Err(e) => {
                    print_failures(&e, cli.format)?;
                    return Err(e.into());
                }
            }
        }

        Commands::Install {
            archive,
            dest,
            trust,
        } => {
            let options = trust.into_options()?;
            let record = match install(&archive, &dest, &options) {
                Ok(record) => record,
                Err(itpkg_engine::InstallError::Integrity(e)) => {
                    print_failures(&e, cli.format)?;
                    return Err(e.into());
                }
                Err(e) => return Err(e.into()),
            };
            match cli.format {
                Format::Json => println!("{}", serde_json::to_string_pretty(&record)?),
                Format::Text => println!(
                    "Installed {}@{} into {}",
                    record.name,
                    record.version,
                    dest.display()
                ),
            }
        }
    }

    Ok(())
}

/// Resolve the package directory and a default package name. A file
/// argument packages its directory under the file's stem.
fn package_dir(path: &Path) -> anyhow::Result<(PathBuf, String)> {
    let abs = std::fs::canonicalize(path).with_context(|| format!("Failed to resolve {:?}", path))?;
    if abs.is_dir() {
        let name = abs
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "package".to_string());
        return Ok((abs, name));
    }
    let name = abs
        .file_stem()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "package".to_string());
    let dir = abs.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
    Ok((dir, name))
}

fn print_report(report: &ValidationReport, format: Format) -> anyhow::Result<()> {
    if format == Format::Json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    if report.is_valid() {
        println!("Package is valid");
    } else {
        println!("Package validation failed:");
        for error in &report.errors {
            println!("  - {}", error);
        }
    }
    if !report.warnings.is_empty() {
        println!("Warnings:");
        for warning in &report.warnings {
            println!("  - {}", warning);
        }
    }
    if !report.infos.is_empty() {
        println!("Notes:");
        for note in &report.infos {
            println!("  - {}", note);
        }
    }
    Ok(())
}

fn print_verified(verified: &itpkg_engine::Verified, format: Format) -> anyhow::Result<()> {
    let signer = match &verified.signer {
        SignerIdentity::Ed25519 { key_id } => format!("ed25519 ({key_id})"),
        SignerIdentity::LegacyMac => "hmac-sha256 (deprecated)".to_string(),
        SignerIdentity::Unsigned => "unsigned".to_string(),
    };
    let notices: Vec<&str> = verified
        .notices
        .iter()
        .map(|n| match n {
            VerifyNotice::UnsignedAccepted => "unsigned package accepted",
            VerifyNotice::LegacyMacUsed => "deprecated HMAC-SHA256 signature used",
        })
        .collect();

    match format {
        Format::Json => {
            let value = serde_json::json!({
                "valid": true,
                "name": verified.manifest.name,
                "version": verified.manifest.version,
                "files": verified.entries.len(),
                "signer": signer,
                "notices": notices,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Format::Text => {
            println!(
                "Verified {}@{}",
                verified.manifest.name, verified.manifest.version
            );
            println!("  files:  {}", verified.entries.len());
            println!("  signer: {}", signer);
            for notice in notices {
                println!("  note:   {}", notice);
            }
        }
    }
    Ok(())
}

fn print_failures(error: &IntegrityError, format: Format) -> anyhow::Result<()> {
    let failures: Vec<String> = error.failures().iter().map(|f| f.to_string()).collect();
    match format {
        Format::Json => {
            let value = serde_json::json!({
                "valid": false,
                "error": error.to_string(),
                "failures": failures,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Format::Text => {
            println!("Verification failed:");
            for failure in failures {
                println!("  - {}", failure);
            }
        }
    }
    Ok(())
}
