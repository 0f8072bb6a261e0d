//! `_CodeSignature/CodeResources` generation.
//!
//! The CodeResources plist records a digest for every resource file in the
//! bundle. `files` is the legacy SHA-1-only table; `files2` carries both
//! digests plus symlink targets. Nested bundle files are listed here too,
//! even though the nested bundles carry their own signatures.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use plist::{Dictionary, Value};
use rayon::prelude::*;
use sha1::{Digest, Sha1};
use sha2::Sha256;
use walkdir::WalkDir;

use crate::bundle::info::InfoPlist;
use crate::{Error, Result};

pub struct CodeResourcesBuilder {
    bundle_path: PathBuf,
    files: BTreeMap<String, ResourceEntry>,
    main_executable: Option<String>,
}

enum ResourceEntry {
    File { sha1: [u8; 20], sha256: [u8; 32] },
    Symlink { target: String },
}

/// Compute both resource digests for a byte slice.
pub fn digest_pair(data: &[u8]) -> ([u8; 20], [u8; 32]) {
    (Sha1::digest(data).into(), Sha256::digest(data).into())
}

fn rule(weight: Option<f64>, omit: bool, optional: bool) -> Value {
    let mut dict = Dictionary::new();
    if omit {
        dict.insert("omit".into(), Value::Boolean(true));
    }
    if optional {
        dict.insert("optional".into(), Value::Boolean(true));
    }
    if let Some(weight) = weight {
        dict.insert("weight".into(), Value::Real(weight));
    }
    Value::Dictionary(dict)
}

/// The legacy `rules` table emitted by codesign.
fn standard_rules() -> Dictionary {
    let mut rules = Dictionary::new();
    rules.insert("^.*".into(), Value::Boolean(true));
    rules.insert("^.*\\.lproj/".into(), rule(Some(1000.0), false, true));
    rules.insert(
        "^.*\\.lproj/locversion.plist$".into(),
        rule(Some(1100.0), true, false),
    );
    rules.insert("^Base\\.lproj/".into(), rule(Some(1010.0), false, false));
    rules.insert("^version.plist$".into(), Value::Boolean(true));
    rules
}

/// The `rules2` table, which additionally omits Info.plist and PkgInfo
/// (they are covered by dedicated code directory slots).
fn standard_rules2() -> Dictionary {
    let mut rules = Dictionary::new();
    rules.insert("^.*".into(), Value::Boolean(true));
    rules.insert(".*\\.dSYM($|/)".into(), rule(Some(11.0), false, false));
    rules.insert(
        "^(.*/)?\\.DS_Store$".into(),
        rule(Some(2000.0), true, false),
    );
    rules.insert("^.*\\.lproj/".into(), rule(Some(1000.0), false, true));
    rules.insert(
        "^.*\\.lproj/locversion.plist$".into(),
        rule(Some(1100.0), true, false),
    );
    rules.insert("^Base\\.lproj/".into(), rule(Some(1010.0), false, false));
    rules.insert("^Info\\.plist$".into(), rule(Some(20.0), true, false));
    rules.insert("^PkgInfo$".into(), rule(Some(20.0), true, false));
    rules.insert(
        "^embedded\\.provisionprofile$".into(),
        rule(Some(20.0), false, false),
    );
    rules.insert("^version\\.plist$".into(), rule(Some(20.0), false, false));
    rules
}

impl CodeResourcesBuilder {
    pub fn new(bundle_path: impl AsRef<Path>) -> Self {
        let bundle_path = bundle_path.as_ref().to_path_buf();
        let main_executable = InfoPlist::open(&bundle_path)
            .ok()
            .and_then(|info| info.executable().map(str::to_string));
        Self {
            bundle_path,
            files: BTreeMap::new(),
            main_executable,
        }
    }

    fn is_excluded(&self, relative: &str) -> bool {
        if relative == "_CodeSignature" || relative.starts_with("_CodeSignature/") {
            return true;
        }
        // The main Mach-O carries an embedded signature instead.
        self.main_executable.as_deref() == Some(relative)
    }

    /// Walk the bundle and digest every file and symlink, in parallel.
    pub fn scan(&mut self) -> Result<&mut Self> {
        let entries: Vec<_> = WalkDir::new(&self.bundle_path)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .collect();

        let hashed: Vec<(String, ResourceEntry)> = entries
            .par_iter()
            .filter_map(|entry| {
                let path = entry.path();
                let meta = fs::symlink_metadata(path).ok()?;
                if !meta.file_type().is_symlink() && meta.is_dir() {
                    return None;
                }
                let relative = path
                    .strip_prefix(&self.bundle_path)
                    .ok()?
                    .to_string_lossy()
                    .to_string();
                if self.is_excluded(&relative) {
                    return None;
                }
                let entry = if meta.file_type().is_symlink() {
                    hash_symlink(path).ok()?
                } else {
                    let data = fs::read(path).ok()?;
                    let (sha1, sha256) = digest_pair(&data);
                    ResourceEntry::File { sha1, sha256 }
                };
                Some((relative, entry))
            })
            .collect();

        self.files.extend(hashed);
        Ok(self)
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn build(&self) -> Result<Vec<u8>> {
        let mut root = Dictionary::new();

        let mut files = Dictionary::new();
        for (path, entry) in &self.files {
            // Symlinks have no representation in the legacy table.
            let ResourceEntry::File { sha1, .. } = entry else {
                continue;
            };
            let value = if path.contains(".lproj/") {
                let mut dict = Dictionary::new();
                dict.insert("hash".into(), Value::Data(sha1.to_vec()));
                dict.insert("optional".into(), Value::Boolean(true));
                Value::Dictionary(dict)
            } else {
                Value::Data(sha1.to_vec())
            };
            files.insert(path.clone(), value);
        }
        root.insert("files".into(), Value::Dictionary(files));

        let mut files2 = Dictionary::new();
        for (path, entry) in &self.files {
            if path == "Info.plist" || path == "PkgInfo" || path.ends_with(".DS_Store") {
                continue;
            }
            let mut dict = Dictionary::new();
            match entry {
                ResourceEntry::File { sha1, sha256 } => {
                    dict.insert("hash".into(), Value::Data(sha1.to_vec()));
                    dict.insert("hash2".into(), Value::Data(sha256.to_vec()));
                }
                ResourceEntry::Symlink { target } => {
                    dict.insert("symlink".into(), Value::String(target.clone()));
                }
            }
            if path.contains(".lproj/") {
                dict.insert("optional".into(), Value::Boolean(true));
            }
            files2.insert(path.clone(), Value::Dictionary(dict));
        }
        root.insert("files2".into(), Value::Dictionary(files2));

        root.insert("rules".into(), Value::Dictionary(standard_rules()));
        root.insert("rules2".into(), Value::Dictionary(standard_rules2()));

        let mut buf = Vec::new();
        plist::to_writer_xml(&mut buf, &Value::Dictionary(root)).map_err(Error::Plist)?;
        Ok(buf)
    }
}

/// A symlink is recorded by its target path, digested as-is.
#[cfg(unix)]
fn hash_symlink(path: &Path) -> Result<ResourceEntry> {
    let target = fs::read_link(path)?;
    Ok(ResourceEntry::Symlink {
        target: target.to_string_lossy().to_string(),
    })
}

#[cfg(not(unix))]
fn hash_symlink(_path: &Path) -> Result<ResourceEntry> {
    Err(Error::SymlinkNotSupported)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_bundle(dir: &Path) -> PathBuf {
        let bundle = dir.join("Test.app");
        fs::create_dir(&bundle).unwrap();
        fs::write(bundle.join("Info.plist"), b"<plist></plist>").unwrap();
        fs::write(bundle.join("PkgInfo"), b"APPL????").unwrap();
        let res = bundle.join("Resources");
        fs::create_dir(&res).unwrap();
        fs::write(res.join("icon.png"), b"fake png data").unwrap();
        bundle
    }

    #[test]
    fn digest_pair_is_stable() {
        let (sha1, sha256) = digest_pair(b"Hello, World!");
        assert_eq!(
            sha1,
            [
                0x0a, 0x0a, 0x9f, 0x2a, 0x67, 0x72, 0x94, 0x25, 0x57, 0xab, 0x53, 0x55, 0xd7, 0x6a,
                0xf4, 0x42, 0xf8, 0xf6, 0x5e, 0x01,
            ]
        );
        assert_ne!(sha256, [0u8; 32]);
    }

    #[test]
    fn scan_skips_signature_directory() {
        let dir = tempdir().unwrap();
        let bundle = make_bundle(dir.path());
        let sig_dir = bundle.join("_CodeSignature");
        fs::create_dir(&sig_dir).unwrap();
        fs::write(sig_dir.join("CodeResources"), b"old").unwrap();

        let mut builder = CodeResourcesBuilder::new(&bundle);
        builder.scan().unwrap();

        assert_eq!(builder.file_count(), 3);
        assert!(builder.files.keys().all(|p| !p.contains("_CodeSignature")));
    }

    #[test]
    fn scan_skips_main_executable() {
        let dir = tempdir().unwrap();
        let bundle = dir.path().join("Test.app");
        fs::create_dir_all(&bundle).unwrap();
        let mut info = Dictionary::new();
        info.insert("CFBundleExecutable".into(), Value::String("TestApp".into()));
        let mut buf = Vec::new();
        plist::to_writer_xml(&mut buf, &Value::Dictionary(info)).unwrap();
        fs::write(bundle.join("Info.plist"), buf).unwrap();
        fs::write(bundle.join("TestApp"), b"macho bytes").unwrap();

        let mut builder = CodeResourcesBuilder::new(&bundle);
        builder.scan().unwrap();
        assert!(!builder.files.contains_key("TestApp"));
        assert!(builder.files.contains_key("Info.plist"));
    }

    #[test]
    fn nested_bundle_files_are_listed() {
        let dir = tempdir().unwrap();
        let bundle = make_bundle(dir.path());
        let fw = bundle.join("Frameworks/Test.framework");
        fs::create_dir_all(&fw).unwrap();
        fs::write(fw.join("Test"), b"framework binary").unwrap();

        let mut builder = CodeResourcesBuilder::new(&bundle);
        builder.scan().unwrap();
        assert!(builder.files.contains_key("Frameworks/Test.framework/Test"));
    }

    #[test]
    fn plist_has_all_four_sections() {
        let dir = tempdir().unwrap();
        let bundle = make_bundle(dir.path());
        let mut builder = CodeResourcesBuilder::new(&bundle);
        builder.scan().unwrap();

        let xml = String::from_utf8(builder.build().unwrap()).unwrap();
        for key in ["files", "files2", "rules", "rules2"] {
            assert!(xml.contains(&format!("<key>{key}</key>")), "missing {key}");
        }
        // Info.plist appears in files but is omitted from files2.
        let files2_at = xml.find("<key>files2</key>").unwrap();
        assert!(xml[..files2_at].contains("<key>Info.plist</key>"));
        assert!(!xml[files2_at..xml.find("<key>rules</key>").unwrap()]
            .contains("<key>Info.plist</key>"));
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_recorded_by_target() {
        use std::os::unix::fs::symlink;

        let dir = tempdir().unwrap();
        let bundle = make_bundle(dir.path());
        symlink("Resources/icon.png", bundle.join("icon-link.png")).unwrap();

        let mut builder = CodeResourcesBuilder::new(&bundle);
        builder.scan().unwrap();

        let xml = String::from_utf8(builder.build().unwrap()).unwrap();
        assert!(xml.contains("<key>symlink</key>"));
        assert!(xml.contains("<string>Resources/icon.png</string>"));
    }
}
