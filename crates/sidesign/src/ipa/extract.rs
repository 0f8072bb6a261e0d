//! IPA extraction.
//!
//! An `.ipa` is a zip archive with the app bundle under `Payload/`. The
//! archive is memory-mapped and file entries are decompressed in parallel,
//! each worker opening its own reader over the shared map.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;
use rayon::prelude::*;
use tracing::debug;
use zip::result::ZipError;
use zip::ZipArchive;

use crate::{Error, Result};

struct PendingFile {
    index: usize,
    dest: PathBuf,
    is_symlink: bool,
    #[cfg(unix)]
    unix_mode: Option<u32>,
}

/// Unpack `ipa_path` into `dest_dir` and return the `.app` bundle path.
pub fn extract_ipa(ipa_path: impl AsRef<Path>, dest_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let ipa_path = ipa_path.as_ref();
    let dest_dir = dest_dir.as_ref();

    let file = File::open(ipa_path)?;
    let mmap = Arc::new(unsafe { Mmap::map(&file)? });
    let mut archive = ZipArchive::new(Cursor::new(&mmap[..]))?;
    fs::create_dir_all(dest_dir)?;

    // Pass 1: plan. Directories are created up front so the parallel pass
    // only ever writes files.
    let mut dirs: BTreeSet<PathBuf> = BTreeSet::new();
    let mut pending: Vec<PendingFile> = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let entry = archive.by_index(index)?;
        // Entries with escaping paths are silently dropped.
        let Some(relative) = entry.enclosed_name() else {
            continue;
        };
        let dest = dest_dir.join(relative);

        if entry.is_dir() {
            dirs.insert(dest);
            continue;
        }
        if let Some(parent) = dest.parent() {
            dirs.insert(parent.to_path_buf());
        }

        #[cfg(unix)]
        let unix_mode = entry.unix_mode();
        #[cfg(unix)]
        let is_symlink = unix_mode.is_some_and(|m| (m & 0o170000) == 0o120000);
        #[cfg(not(unix))]
        let is_symlink = false;

        pending.push(PendingFile {
            index,
            dest,
            is_symlink,
            #[cfg(unix)]
            unix_mode,
        });
    }
    for dir in &dirs {
        fs::create_dir_all(dir)?;
    }

    debug!(files = pending.len(), "extracting archive");
    pending.par_iter().try_for_each(|entry| -> Result<()> {
        let mut archive = ZipArchive::new(Cursor::new(&mmap[..]))?;
        let mut zip_file = archive.by_index(entry.index)?;

        if entry.is_symlink {
            return restore_symlink(&mut zip_file, &entry.dest);
        }

        let mut out = File::create(&entry.dest)?;
        io::copy(&mut zip_file, &mut out)?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&entry.dest, fs::Permissions::from_mode(mode & 0o7777))?;
        }
        Ok(())
    })?;

    find_app_bundle(dest_dir)
}

#[cfg(unix)]
fn restore_symlink(zip_file: &mut impl Read, dest: &Path) -> Result<()> {
    let mut target = String::new();
    zip_file.read_to_string(&mut target)?;
    if dest.symlink_metadata().is_ok() {
        let _ = fs::remove_file(dest);
    }
    std::os::unix::fs::symlink(&target, dest)?;
    Ok(())
}

#[cfg(not(unix))]
fn restore_symlink(_zip_file: &mut impl Read, _dest: &Path) -> Result<()> {
    Err(Error::SymlinkNotSupported)
}

/// Locate the single `.app` directory under `Payload/`.
fn find_app_bundle(dest_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let payload = dest_dir.as_ref().join("Payload");
    if !payload.is_dir() {
        return Err(Error::Zip(ZipError::InvalidArchive(
            "no Payload directory in archive",
        )));
    }
    for entry in fs::read_dir(&payload)? {
        let path = entry?.path();
        if path.is_dir() && path.extension().is_some_and(|ext| ext == "app") {
            return Ok(path);
        }
    }
    Err(Error::Zip(ZipError::InvalidArchive(
        "no .app bundle under Payload/",
    )))
}

/// Cheap sanity check before extraction: the file must exist and start
/// with a zip signature.
pub fn validate_ipa(ipa_path: impl AsRef<Path>) -> Result<()> {
    let ipa_path = ipa_path.as_ref();
    let mut file = File::open(ipa_path).map_err(|e| {
        Error::Io(io::Error::new(
            e.kind(),
            format!("{}: {e}", ipa_path.display()),
        ))
    })?;
    let mut magic = [0u8; 4];
    file.read_exact(&mut magic)?;
    if &magic[..2] != b"PK" {
        return Err(Error::Zip(ZipError::InvalidArchive("not a zip archive")));
    }
    Ok(())
}
