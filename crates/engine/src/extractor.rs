//! Writing a verified archive out to disk.

use crate::error::ExtractionError;
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use tar::{Archive, EntryType};
use tracing::{debug, info, warn};

/// What an extraction produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedTree {
    pub root: PathBuf,
    /// Regular files written, relative to `root`.
    pub files: Vec<PathBuf>,
    pub directories: Vec<PathBuf>,
    /// Entries of unsupported kinds that were not written.
    pub skipped: Vec<String>,
}

/// Resolve an archive entry path below `root`, lexically.
///
/// Absolute paths, drive prefixes and `..` segments are rejected outright;
/// the result must name something strictly inside `root`.
pub fn resolve_entry_path(root: &Path, entry: &Path) -> Result<PathBuf, ExtractionError> {
    let escape = || ExtractionError::PathEscape {
        entry: entry.display().to_string(),
    };
    let mut relative = PathBuf::new();
    for component in entry.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(escape())
            }
        }
    }
    if relative.as_os_str().is_empty() {
        return Err(escape());
    }
    Ok(root.join(relative))
}

/// Extract the archive file at `archive_path` into `destination`.
///
/// Stops at the first offending entry. The destination is left as it was
/// at that point; callers treat it as invalid and remove it.
pub fn extract(archive_path: &Path, destination: &Path) -> Result<ExtractedTree, ExtractionError> {
    let file = File::open(archive_path).map_err(|source| ExtractionError::Read {
        path: archive_path.to_path_buf(),
        source,
    })?;
    extract_from(file, archive_path, destination)
}

/// Extract a gzip-compressed tar stream into `destination`.
///
/// `origin` only names the stream in errors and logs. Pass the bytes that
/// were verified to extract exactly those.
pub fn extract_from<R: Read>(
    reader: R,
    origin: &Path,
    destination: &Path,
) -> Result<ExtractedTree, ExtractionError> {
    info!("Extracting {:?} into {:?}", origin, destination);

    let read_err = |source| ExtractionError::Read {
        path: origin.to_path_buf(),
        source,
    };

    fs::create_dir_all(destination).map_err(|source| ExtractionError::Write {
        path: destination.to_path_buf(),
        source,
    })?;

    let mut tree = ExtractedTree {
        root: destination.to_path_buf(),
        ..Default::default()
    };
    // Directory modes are applied last so read-only directories can still be filled.
    let mut directory_modes = Vec::new();

    let mut archive = Archive::new(GzDecoder::new(reader));
    for entry in archive.entries().map_err(read_err)? {
        let mut entry = entry.map_err(read_err)?;
        let entry_path = entry.path().map_err(read_err)?.into_owned();
        let target = resolve_entry_path(destination, &entry_path)?;
        let mode = entry.header().mode().unwrap_or(0o644) & 0o7777;
        let relative = target
            .strip_prefix(destination)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| entry_path.clone());

        let write_err = |source| ExtractionError::Write {
            path: target.clone(),
            source,
        };

        match entry.header().entry_type() {
            EntryType::Directory => {
                fs::create_dir_all(&target).map_err(write_err)?;
                directory_modes.push((target.clone(), mode));
                tree.directories.push(relative);
            }
            EntryType::Regular | EntryType::Continuous => {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent).map_err(write_err)?;
                }
                let mut out = File::create(&target).map_err(write_err)?;
                io::copy(&mut entry, &mut out).map_err(write_err)?;
                out.sync_all().map_err(write_err)?;
                drop(out);
                set_mode(&target, mode).map_err(write_err)?;
                debug!("Wrote {:?}", relative);
                tree.files.push(relative);
            }
            other => {
                warn!("Skipping {:?} entry {:?}", other, entry_path);
                tree.skipped.push(entry_path.display().to_string());
            }
        }
    }

    for (dir, mode) in directory_modes.into_iter().rev() {
        set_mode(&dir, mode).map_err(|source| ExtractionError::Write { path: dir, source })?;
    }

    info!(
        "Extracted {} files into {:?}",
        tree.files.len(),
        destination
    );
    Ok(tree)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tar::{Builder, Header};
    use tempfile::tempdir;

    /// Write an entry whose name bypasses the tar crate's own path checks.
    fn append_raw(builder: &mut Builder<GzEncoder<File>>, name: &[u8], kind: EntryType, data: &[u8]) {
        let mut header = Header::new_gnu();
        header.as_old_mut().name[..name.len()].copy_from_slice(name);
        header.set_entry_type(kind);
        header.set_mode(0o644);
        header.set_size(data.len() as u64);
        header.set_cksum();
        builder.append(&header, data).unwrap();
    }

    fn crafted_archive(path: &Path, entries: &[(&[u8], EntryType, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut builder = Builder::new(GzEncoder::new(file, Compression::default()));
        for (name, kind, data) in entries {
            append_raw(&mut builder, name, *kind, data);
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn test_resolve_entry_path() {
        let root = Path::new("/tmp/dest");
        assert_eq!(
            resolve_entry_path(root, Path::new("intents/a.itml")).unwrap(),
            root.join("intents/a.itml")
        );
        assert_eq!(
            resolve_entry_path(root, Path::new("./a.txt")).unwrap(),
            root.join("a.txt")
        );
        assert!(resolve_entry_path(root, Path::new("../evil")).is_err());
        assert!(resolve_entry_path(root, Path::new("a/../../evil")).is_err());
        assert!(resolve_entry_path(root, Path::new("/etc/passwd")).is_err());
        assert!(resolve_entry_path(root, Path::new(".")).is_err());
    }

    #[test]
    fn test_extract_files_and_dirs() {
        let dir = tempdir().unwrap();
        let archive_path = dir.path().join("pkg.itpkg");
        crafted_archive(
            &archive_path,
            &[
                (b"intents/", EntryType::Directory, b""),
                (b"intents/a.itml", EntryType::Regular, b"hello"),
            ],
        );

        let dest = dir.path().join("out");
        let tree = extract(&archive_path, &dest).unwrap();
        assert_eq!(tree.files, vec![PathBuf::from("intents/a.itml")]);
        assert_eq!(tree.directories, vec![PathBuf::from("intents")]);
        assert_eq!(fs::read(dest.join("intents/a.itml")).unwrap(), b"hello");
    }

    #[test]
    fn test_extract_from_bytes() {
        let dir = tempdir().unwrap();
        let archive_path = dir.path().join("pkg.itpkg");
        crafted_archive(&archive_path, &[(b"a.txt", EntryType::Regular, b"held")]);
        let bytes = fs::read(&archive_path).unwrap();
        fs::remove_file(&archive_path).unwrap();

        let dest = dir.path().join("out");
        let tree = extract_from(bytes.as_slice(), &archive_path, &dest).unwrap();
        assert_eq!(tree.files, vec![PathBuf::from("a.txt")]);
        assert_eq!(fs::read(dest.join("a.txt")).unwrap(), b"held");
    }

    #[test]
    fn test_parent_segment_is_rejected() {
        let dir = tempdir().unwrap();
        let archive_path = dir.path().join("evil.itpkg");
        crafted_archive(&archive_path, &[(b"../evil.txt", EntryType::Regular, b"boom")]);

        let dest = dir.path().join("out");
        let err = extract(&archive_path, &dest).unwrap_err();
        assert!(matches!(err, ExtractionError::PathEscape { ref entry } if entry == "../evil.txt"));
        assert!(!dir.path().join("evil.txt").exists());
    }

    #[test]
    fn test_symlinks_are_skipped() {
        let dir = tempdir().unwrap();
        let archive_path = dir.path().join("link.itpkg");
        crafted_archive(
            &archive_path,
            &[
                (b"a.txt", EntryType::Regular, b"a"),
                (b"link", EntryType::Symlink, b""),
            ],
        );

        let dest = dir.path().join("out");
        let tree = extract(&archive_path, &dest).unwrap();
        assert_eq!(tree.skipped, vec!["link".to_string()]);
        assert!(!dest.join("link").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_modes_are_applied() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let archive_path = dir.path().join("mode.itpkg");
        let file = File::create(&archive_path).unwrap();
        let mut builder = Builder::new(GzEncoder::new(file, Compression::default()));
        crate::archive::append_file(&mut builder, "run.sh", 0o755, b"#!/bin/sh\n").unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let dest = dir.path().join("out");
        extract(&archive_path, &dest).unwrap();
        let mode = fs::metadata(dest.join("run.sh")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }
}
