//! IPA repacking.
//!
//! Rebuilds a `Payload/<App>.app/...` zip from a signed bundle directory,
//! preserving unix permissions and symlinks.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::{Error, Result};

/// Deflate level for the output archive, clamped to 0..=9. Level 0 stores
/// entries uncompressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionLevel(u32);

impl CompressionLevel {
    pub const NONE: CompressionLevel = CompressionLevel(0);
    pub const DEFAULT: CompressionLevel = CompressionLevel(6);
    pub const MAX: CompressionLevel = CompressionLevel(9);

    #[must_use]
    pub fn new(level: u32) -> Self {
        CompressionLevel(level.min(9))
    }

    #[must_use]
    pub fn level(&self) -> u32 {
        self.0
    }
}

impl Default for CompressionLevel {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl From<u32> for CompressionLevel {
    fn from(level: u32) -> Self {
        CompressionLevel::new(level)
    }
}

/// Pack `app_bundle_path` into an `.ipa` at `output_path`.
pub fn create_ipa(
    app_bundle_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    compression: CompressionLevel,
) -> Result<()> {
    let app_bundle_path = app_bundle_path.as_ref();
    let output_path = output_path.as_ref();

    if !app_bundle_path.is_dir() {
        return Err(Error::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("not an app bundle directory: {}", app_bundle_path.display()),
        )));
    }
    let app_name = app_bundle_path
        .file_name()
        .ok_or_else(|| {
            Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "app bundle path has no name",
            ))
        })?
        .to_string_lossy();

    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let options = if compression == CompressionLevel::NONE {
        SimpleFileOptions::default().compression_method(CompressionMethod::Stored)
    } else {
        SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(compression.level() as i64))
    };

    let mut zip = ZipWriter::new(File::create(output_path)?);
    zip.add_directory("Payload/", options)?;

    for entry in WalkDir::new(app_bundle_path).follow_links(false) {
        let entry = entry.map_err(|e| Error::Io(io::Error::other(e.to_string())))?;
        let path = entry.path();
        let relative = path.strip_prefix(app_bundle_path).map_err(|_| {
            Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "entry escapes the bundle root",
            ))
        })?;
        let archive_path = if relative.as_os_str().is_empty() {
            format!("Payload/{app_name}/")
        } else {
            format!("Payload/{app_name}/{}", relative.display())
        };

        let meta = fs::symlink_metadata(path)?;
        if meta.is_dir() {
            let dir_path = if archive_path.ends_with('/') {
                archive_path
            } else {
                format!("{archive_path}/")
            };
            zip.add_directory(dir_path, options)?;
        } else if meta.file_type().is_symlink() {
            let target = fs::read_link(path)?;
            zip.add_symlink(archive_path, target.to_string_lossy(), options)?;
        } else {
            #[cfg(unix)]
            let options = {
                use std::os::unix::fs::PermissionsExt;
                options.unix_permissions(meta.permissions().mode())
            };
            zip.start_file(archive_path, options)?;
            zip.write_all(&fs::read(path)?)?;
        }
    }

    zip.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;
    use zip::ZipArchive;

    fn make_app_bundle(dir: &Path) -> PathBuf {
        let app = dir.join("Test.app");
        fs::create_dir_all(app.join("_CodeSignature")).unwrap();
        fs::create_dir_all(app.join("Resources")).unwrap();
        fs::write(app.join("Info.plist"), b"<plist><dict/></plist>").unwrap();
        fs::write(app.join("Test"), b"binary placeholder").unwrap();
        fs::write(app.join("_CodeSignature/CodeResources"), b"<plist/>").unwrap();
        fs::write(app.join("Resources/icon.png"), b"PNG_DATA").unwrap();
        app
    }

    fn entry_names(ipa: &Path) -> Vec<String> {
        let mut archive = ZipArchive::new(File::open(ipa).unwrap()).unwrap();
        (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect()
    }

    #[test]
    fn archive_has_payload_layout() {
        let dir = TempDir::new().unwrap();
        let app = make_app_bundle(dir.path());
        let ipa = dir.path().join("out.ipa");

        create_ipa(&app, &ipa, CompressionLevel::DEFAULT).unwrap();

        let names = entry_names(&ipa);
        assert!(names.iter().any(|n| n == "Payload/"));
        assert!(names.iter().any(|n| n == "Payload/Test.app/Info.plist"));
        assert!(names.iter().any(|n| n == "Payload/Test.app/Test"));
        assert!(names
            .iter()
            .any(|n| n == "Payload/Test.app/_CodeSignature/CodeResources"));
    }

    #[test]
    fn stored_and_max_levels_produce_archives() {
        let dir = TempDir::new().unwrap();
        let app = make_app_bundle(dir.path());

        for (name, level) in [
            ("stored.ipa", CompressionLevel::NONE),
            ("max.ipa", CompressionLevel::MAX),
        ] {
            let ipa = dir.path().join(name);
            create_ipa(&app, &ipa, level).unwrap();
            assert!(!entry_names(&ipa).is_empty());
        }
    }

    #[test]
    fn missing_bundle_is_an_error() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out.ipa");
        assert!(create_ipa("/nonexistent/Test.app", &out, CompressionLevel::DEFAULT).is_err());

        let not_a_dir = dir.path().join("file.app");
        fs::write(&not_a_dir, b"flat file").unwrap();
        assert!(create_ipa(&not_a_dir, &out, CompressionLevel::DEFAULT).is_err());
    }

    #[test]
    fn level_clamps_to_nine() {
        assert_eq!(CompressionLevel::new(15).level(), 9);
        assert_eq!(CompressionLevel::from(5).level(), 5);
        assert_eq!(CompressionLevel::default(), CompressionLevel::DEFAULT);
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_kept_as_symlink_entries() {
        use std::os::unix::fs::symlink;

        let dir = TempDir::new().unwrap();
        let app = make_app_bundle(dir.path());
        let versions = app.join("Frameworks/A.framework/Versions");
        fs::create_dir_all(versions.join("A")).unwrap();
        fs::write(versions.join("A/A"), b"binary").unwrap();
        symlink("A", versions.join("Current")).unwrap();

        let ipa = dir.path().join("out.ipa");
        create_ipa(&app, &ipa, CompressionLevel::DEFAULT).unwrap();

        let mut archive = ZipArchive::new(File::open(&ipa).unwrap()).unwrap();
        let mut found = false;
        for i in 0..archive.len() {
            let entry = archive.by_index(i).unwrap();
            if entry.name().ends_with("Versions/Current") {
                let mode = entry.unix_mode().unwrap_or(0);
                found = (mode & 0o170000) == 0o120000;
            }
        }
        assert!(found, "symlink entry missing from archive");
    }
}
