//! Info.plist access and metadata overrides.

use std::path::{Path, PathBuf};

use plist::{Dictionary, Value};

use crate::{Error, Result};

/// Metadata overrides applied to the app's Info.plist before signing.
///
/// `None` fields leave the existing value in place. A version override sets
/// both `CFBundleShortVersionString` and `CFBundleVersion`.
#[derive(Debug, Clone, Default)]
pub struct InfoOverrides {
    pub bundle_id: Option<String>,
    pub display_name: Option<String>,
    pub bundle_version: Option<String>,
}

impl InfoOverrides {
    pub fn is_empty(&self) -> bool {
        self.bundle_id.is_none() && self.display_name.is_none() && self.bundle_version.is_none()
    }
}

/// A bundle's Info.plist, loaded from `<bundle>/Info.plist`.
pub struct InfoPlist {
    path: PathBuf,
    root: Dictionary,
}

impl InfoPlist {
    pub fn open(bundle_dir: &Path) -> Result<Self> {
        let path = bundle_dir.join("Info.plist");
        let data = std::fs::read(&path)?;
        let root = plist::from_bytes::<Value>(&data)?
            .into_dictionary()
            .ok_or_else(|| {
                Error::Config(format!("{} is not a plist dictionary", path.display()))
            })?;
        Ok(Self { path, root })
    }

    fn string(&self, key: &str) -> Option<&str> {
        self.root.get(key).and_then(|v| v.as_string())
    }

    pub fn bundle_identifier(&self) -> Option<&str> {
        self.string("CFBundleIdentifier")
    }

    /// Name of the bundle's main Mach-O, relative to the bundle root.
    pub fn executable(&self) -> Option<&str> {
        self.string("CFBundleExecutable")
    }

    /// Apply metadata overrides in memory. Returns true if anything changed.
    pub fn apply(&mut self, overrides: &InfoOverrides) -> bool {
        let mut changed = false;
        if let Some(id) = &overrides.bundle_id {
            changed |= self.set("CFBundleIdentifier", id);
        }
        if let Some(name) = &overrides.display_name {
            changed |= self.set("CFBundleDisplayName", name);
        }
        if let Some(version) = &overrides.bundle_version {
            changed |= self.set("CFBundleShortVersionString", version);
            changed |= self.set("CFBundleVersion", version);
        }
        changed
    }

    fn set(&mut self, key: &str, value: &str) -> bool {
        if self.string(key) == Some(value) {
            return false;
        }
        self.root
            .insert(key.to_string(), Value::String(value.to_string()));
        true
    }

    /// Write the plist back to its on-disk location as XML.
    pub fn save(&self) -> Result<()> {
        let mut buf = Vec::new();
        plist::to_writer_xml(&mut buf, &Value::Dictionary(self.root.clone()))?;
        std::fs::write(&self.path, buf)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_info(dir: &Path, id: &str) {
        let mut root = Dictionary::new();
        root.insert("CFBundleIdentifier".into(), Value::String(id.into()));
        root.insert("CFBundleExecutable".into(), Value::String("TestApp".into()));
        root.insert(
            "CFBundleShortVersionString".into(),
            Value::String("1.0".into()),
        );
        root.insert("CFBundleVersion".into(), Value::String("7".into()));
        let mut buf = Vec::new();
        plist::to_writer_xml(&mut buf, &Value::Dictionary(root)).unwrap();
        std::fs::write(dir.join("Info.plist"), buf).unwrap();
    }

    #[test]
    fn reads_identifier_and_executable() {
        let dir = tempdir().unwrap();
        write_info(dir.path(), "com.example.app");

        let info = InfoPlist::open(dir.path()).unwrap();
        assert_eq!(info.bundle_identifier(), Some("com.example.app"));
        assert_eq!(info.executable(), Some("TestApp"));
    }

    #[test]
    fn overrides_rename_and_reversion() {
        let dir = tempdir().unwrap();
        write_info(dir.path(), "com.example.app");

        let mut info = InfoPlist::open(dir.path()).unwrap();
        let changed = info.apply(&InfoOverrides {
            bundle_id: Some("com.other.app".into()),
            display_name: Some("Other".into()),
            bundle_version: Some("2.3.4".into()),
        });
        assert!(changed);
        info.save().unwrap();

        let reread = InfoPlist::open(dir.path()).unwrap();
        assert_eq!(reread.bundle_identifier(), Some("com.other.app"));
        assert_eq!(reread.string("CFBundleDisplayName"), Some("Other"));
        assert_eq!(reread.string("CFBundleShortVersionString"), Some("2.3.4"));
        assert_eq!(reread.string("CFBundleVersion"), Some("2.3.4"));
    }

    #[test]
    fn noop_override_reports_unchanged() {
        let dir = tempdir().unwrap();
        write_info(dir.path(), "com.example.app");

        let mut info = InfoPlist::open(dir.path()).unwrap();
        assert!(!info.apply(&InfoOverrides {
            bundle_id: Some("com.example.app".into()),
            ..Default::default()
        }));
        assert!(!info.apply(&InfoOverrides::default()));
    }

    #[test]
    fn missing_info_plist_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(InfoPlist::open(dir.path()).is_err());
    }
}
