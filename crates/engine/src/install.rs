//! Verified installation of a package archive.

use crate::archive::{read_archive, ArchiveContents};
use crate::builder::sanitize_package_name;
use crate::error::InstallError;
use crate::extractor::extract_from;
use crate::options::VerifyOptions;
use crate::verifier::verify;
use chrono::Utc;
use itpkg_schema::{InstallRecord, INSTALL_RECORD_FILE};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Mode of an installed package directory, before the process umask.
const INSTALL_DIR_MODE: u32 = 0o755;

/// Verify `archive`, extract it under `dest_root/<package>`, and record the install.
///
/// The archive is read once. The bytes that pass verification are the
/// bytes that get extracted.
pub fn install(
    archive: &Path,
    dest_root: &Path,
    options: &VerifyOptions,
) -> Result<InstallRecord, InstallError> {
    let contents = read_archive(archive)?;
    install_contents(&contents, dest_root, options)
}

/// Install an archive that was already read into memory.
///
/// Nothing is extracted unless verification passes. The package is
/// extracted into a staging directory next to its target and moved into
/// place only once extraction and the install record succeed. A previous
/// install of the same package survives any failure before that point.
pub fn install_contents(
    contents: &ArchiveContents,
    dest_root: &Path,
    options: &VerifyOptions,
) -> Result<InstallRecord, InstallError> {
    let verified = verify(contents, options)?;

    let dir_name = sanitize_package_name(&verified.manifest.name);
    let target = dest_root.join(&dir_name);
    let staged = staging_dir(dest_root, &dir_name)?;

    let tree = extract_from(contents.bytes(), contents.path(), staged.path())?;
    debug!(
        "Staged {} files in {:?}",
        tree.files.len(),
        staged.path()
    );

    let record = InstallRecord {
        name: verified.manifest.name.clone(),
        version: verified.manifest.version.clone(),
        source: contents.path().display().to_string(),
        sha256: contents.sha256().to_string(),
        installed_at: Utc::now(),
    };
    write_record(staged.path(), &record)?;
    move_into_place(staged, &target)?;

    info!(
        "Installed {}@{} into {:?}",
        record.name, record.version, target
    );
    Ok(record)
}

fn staging_dir(dest_root: &Path, dir_name: &str) -> Result<TempDir, InstallError> {
    let stage_err = |source| InstallError::Stage {
        path: dest_root.to_path_buf(),
        source,
    };
    fs::create_dir_all(dest_root).map_err(stage_err)?;

    let prefix = format!(".{dir_name}-staged-");
    let mut builder = tempfile::Builder::new();
    builder.prefix(&prefix);
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(fs::Permissions::from_mode(INSTALL_DIR_MODE));
    }
    builder.tempdir_in(dest_root).map_err(stage_err)
}

/// Swap a fully staged install in for whatever is at `target`.
///
/// The previous install is set aside first and restored if the final
/// rename fails.
fn move_into_place(staged: TempDir, target: &Path) -> Result<(), InstallError> {
    let replace_err = |source| InstallError::Replace {
        path: target.to_path_buf(),
        source,
    };
    let previous = previous_path(target);

    let had_previous = target.exists();
    if had_previous {
        if previous.exists() {
            fs::remove_dir_all(&previous).map_err(replace_err)?;
        }
        info!("Replacing existing install at {:?}", target);
        fs::rename(target, &previous).map_err(replace_err)?;
    }

    if let Err(source) = fs::rename(staged.path(), target) {
        if had_previous {
            if let Err(restore) = fs::rename(&previous, target) {
                warn!("Failed to restore {:?} from {:?}: {}", target, previous, restore);
            }
        }
        return Err(replace_err(source));
    }
    // The staged directory now lives at `target`; dropping the handle finds nothing to remove.
    drop(staged);

    if had_previous {
        if let Err(e) = fs::remove_dir_all(&previous) {
            warn!("Failed to remove previous install {:?}: {}", previous, e);
        }
    }
    Ok(())
}

fn previous_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{name}.previous"))
}

fn write_record(target: &Path, record: &InstallRecord) -> Result<(), InstallError> {
    let path: PathBuf = target.join(INSTALL_RECORD_FILE);
    let record_err = |source: itpkg_common::Error| InstallError::Record {
        path: path.clone(),
        source,
    };
    let json = serde_json::to_vec_pretty(record).map_err(|e| record_err(e.into()))?;
    fs::write(&path, json).map_err(|e| record_err(e.into()))?;
    Ok(())
}
