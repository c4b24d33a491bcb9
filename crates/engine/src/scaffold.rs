//! Generating a starter manifest and project layout.

use itpkg_common::{Error, Result};
use itpkg_schema::layout::REQUIRED_DIRS;
use itpkg_schema::{Manifest, PackageKind, MANIFEST_FILE};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Entry point an app package is expected to have.
pub const APP_ENTRY: &str = "project.app.itml";

const APP_CAPABILITIES: &[&str] = &["ui.render", "http.outbound"];

const HELLO_INTENT: &str = r#"intent "Hello World"
inputs:
  - name (string) default="World"
workflow:
  → log("Hello {name}!")
  → return(status="ok", message="Hello {name}!")
"#;

const SECURITY_POLICY: &str = r#"security:
  network:
    outbound:
      deny: ["*"]
      allow: []
  filesystem:
    read: ["intents/**", "policies/**"]
    write: []
"#;

/// Options for [`init_project`].
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// Scope without or with the leading `@`; defaults to `scope`.
    pub scope: Option<String>,
    /// Create an app package with an entry point.
    pub app: bool,
    /// Overwrite an existing manifest.
    pub force: bool,
}

/// Create any missing required directories, returning the ones created.
pub fn ensure_required_dirs(dir: &Path) -> Result<Vec<&'static str>> {
    let mut created = Vec::new();
    for name in REQUIRED_DIRS {
        let path = dir.join(name);
        if !path.is_dir() {
            fs::create_dir_all(&path)?;
            debug!("Created directory {:?}", path);
            created.push(*name);
        }
    }
    Ok(created)
}

/// Write a minimal manifest for an existing directory.
///
/// The package is an app when the conventional entry point exists, a
/// library otherwise. Fails if a manifest is already present.
pub fn scaffold(dir: &Path, name: &str, scope: Option<&str>) -> Result<Manifest> {
    if dir.join(MANIFEST_FILE).exists() {
        return Err(Error::Scaffold(format!(
            "{MANIFEST_FILE} already exists in {}",
            dir.display()
        )));
    }
    ensure_required_dirs(dir)?;

    let manifest = starter_manifest(name, scope, dir.join(APP_ENTRY).is_file());
    write_manifest(dir, &manifest)?;
    info!("Scaffolded {} as {:?}", manifest.name, manifest.kind());
    Ok(manifest)
}

/// Create a new project: manifest, example intent, example policy, README,
/// and for apps the entry point.
pub fn init_project(dir: &Path, name: &str, options: &InitOptions) -> Result<Manifest> {
    if name.is_empty() || name.contains(|c: char| c.is_whitespace() || c == '/' || c == '\\') {
        return Err(Error::Scaffold(format!(
            "invalid project name {name:?}: must be non-empty without spaces or path separators"
        )));
    }
    if dir.join(MANIFEST_FILE).exists() && !options.force {
        return Err(Error::Scaffold(format!(
            "{MANIFEST_FILE} already exists in {}",
            dir.display()
        )));
    }

    fs::create_dir_all(dir)?;
    ensure_required_dirs(dir)?;

    let manifest = starter_manifest(name, options.scope.as_deref(), options.app);
    write_manifest(dir, &manifest)?;
    fs::write(dir.join("intents").join("hello.itml"), HELLO_INTENT)?;
    fs::write(dir.join("policies").join("security.itml"), SECURITY_POLICY)?;
    if options.app {
        fs::write(dir.join(APP_ENTRY), app_entry(name))?;
    }
    fs::write(dir.join("README.md"), readme(name, options.app))?;

    info!("Initialized project {} in {:?}", manifest.name, dir);
    Ok(manifest)
}

fn starter_manifest(name: &str, scope: Option<&str>, app: bool) -> Manifest {
    let scope = scope
        .map(|s| s.trim_start_matches('@'))
        .filter(|s| !s.is_empty())
        .unwrap_or("scope");
    let kind = if app { PackageKind::App } else { PackageKind::Lib };

    let mut manifest = Manifest::new(format!("@{scope}/{name}"), "0.1.0", kind);
    manifest.description = format!("Intent package for {name}");
    if app {
        manifest.entry = Some(APP_ENTRY.to_string());
        manifest.capabilities = APP_CAPABILITIES.iter().map(|c| c.to_string()).collect();
    }
    manifest
}

fn write_manifest(dir: &Path, manifest: &Manifest) -> Result<()> {
    fs::write(dir.join(MANIFEST_FILE), manifest.to_canonical_bytes()?)?;
    Ok(())
}

fn app_entry(name: &str) -> String {
    format!(
        "app \"{name}\"\nversion: \"0.1.0\"\ndescription: \"A new intent application\"\n\nroutes:\n  - path: \"/\"\n    intent: \"hello\"\n"
    )
}

fn readme(name: &str, app: bool) -> String {
    let entry = if app {
        "├── project.app.itml   # Application entrypoint\n"
    } else {
        ""
    };
    format!(
        "# {name}\n\nAn Intent package.\n\n## Project Structure\n\n```\n{name}/\n├── itpkg.json          # Package manifest\n├── intents/            # Intent definitions\n│   └── hello.itml\n├── policies/           # Security and privacy policies\n│   └── security.itml\n{entry}```\n\n## Package\n\n```\nitpkg package . --out dist/\n```\n"
    )
}
