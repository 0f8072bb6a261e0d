//! App bundle signing.
//!
//! A bundle is signed in place: nested bundles first (deepest nesting
//! level up), then the bundle's own binaries, then `_CodeSignature/
//! CodeResources`, and finally the main executable, whose signature covers
//! the CodeResources file. Standalone dylibs anywhere in the tree are
//! signed up front with no bundle context.

pub mod code_resources;
pub mod info;

pub use code_resources::CodeResourcesBuilder;
pub use info::{InfoOverrides, InfoPlist};

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::crypto::{ProvisioningProfile, SigningCredentials};
use crate::macho::{sign_macho, MachOFile, SigningInputs};
use crate::{Error, Result};

/// Entitlements for binaries that are not the main executable.
const EMPTY_ENTITLEMENTS: &[u8] = b"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<!DOCTYPE plist PUBLIC \"-//Apple//DTD PLIST 1.0//EN\" \"http://www.apple.com/DTDs/PropertyList-1.0.dtd\">\n<plist version=\"1.0\">\n<dict/>\n</plist>\n";

/// Signs a `.app` directory tree in place.
pub struct BundleSigner<'a> {
    credentials: Option<&'a SigningCredentials>,
    profile: Option<&'a ProvisioningProfile>,
    overrides: InfoOverrides,
}

impl<'a> BundleSigner<'a> {
    /// `None` credentials produce ad-hoc signatures.
    pub fn new(credentials: Option<&'a SigningCredentials>) -> Self {
        Self {
            credentials,
            profile: None,
            overrides: InfoOverrides::default(),
        }
    }

    /// Embed this profile as `embedded.mobileprovision` and sign the main
    /// executable with its entitlements.
    pub fn provisioning_profile(mut self, profile: &'a ProvisioningProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    /// Info.plist overrides applied to the main bundle before hashing.
    pub fn overrides(mut self, overrides: InfoOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Sign the bundle rooted at `bundle_path` in place.
    pub fn sign_app(&self, bundle_path: &Path) -> Result<()> {
        if !bundle_path.join("Info.plist").is_file() {
            return Err(Error::Signing(format!(
                "{} is not an app bundle (no Info.plist)",
                bundle_path.display()
            )));
        }

        if !self.overrides.is_empty() {
            let mut main_info = InfoPlist::open(bundle_path)?;
            if main_info.apply(&self.overrides) {
                main_info.save()?;
            }
        }

        for dylib in standalone_dylibs(bundle_path) {
            self.sign_dylib(&dylib)?;
        }

        // Deepest nesting first, so each parent's CodeResources covers
        // already-signed children.
        let mut bundles = collect_bundles(bundle_path);
        bundles.sort_by_key(|(_, depth)| std::cmp::Reverse(*depth));
        for (bundle, _) in &bundles {
            self.sign_one_bundle(bundle, bundle == bundle_path)?;
        }

        Ok(())
    }

    fn sign_one_bundle(&self, bundle: &Path, is_main: bool) -> Result<()> {
        debug!(bundle = %bundle.display(), is_main, "signing bundle");

        let info = InfoPlist::open(bundle).ok();
        let fallback_name = || {
            bundle
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "bundle".to_string())
        };
        let identifier = info
            .as_ref()
            .and_then(|i| i.bundle_identifier().map(str::to_string))
            .unwrap_or_else(fallback_name);
        let main_executable = bundle.join(
            info.as_ref()
                .and_then(|i| i.executable().map(str::to_string))
                .unwrap_or_else(fallback_name),
        );

        // Auxiliary binaries first; CodeResources must hash their final
        // bytes.
        for binary in immediate_machos(bundle, &main_executable) {
            self.sign_binary(&binary, &identifier, None, false)?;
        }

        if is_main {
            if let Some(profile) = self.profile {
                fs::write(bundle.join("embedded.mobileprovision"), profile.raw())?;
            }
        }

        let resources = CodeResourcesBuilder::new(bundle).scan()?.build()?;
        let sig_dir = bundle.join("_CodeSignature");
        fs::create_dir_all(&sig_dir)?;
        fs::write(sig_dir.join("CodeResources"), &resources)?;

        if main_executable.is_file() {
            self.sign_binary(&main_executable, &identifier, Some(&resources), is_main)?;
        }
        Ok(())
    }

    /// Only the top-level bundle's main executable carries the profile
    /// entitlements; everything else gets the empty dict.
    fn sign_binary(
        &self,
        path: &Path,
        identifier: &str,
        code_resources: Option<&[u8]>,
        profile_entitlements: bool,
    ) -> Result<()> {
        let macho = MachOFile::open(path)?;

        let info_data = match path.parent() {
            Some(dir) if dir.join("Info.plist").is_file() => {
                Some(fs::read(dir.join("Info.plist"))?)
            }
            _ => None,
        };
        let is_executable = macho.slices().iter().any(|s| s.is_executable);
        let entitlements = if profile_entitlements && is_executable {
            self.profile
                .map(|p| p.entitlements_xml())
                .or(Some(EMPTY_ENTITLEMENTS))
        } else {
            Some(EMPTY_ENTITLEMENTS)
        };

        let inputs = SigningInputs {
            identifier,
            entitlements,
            info_plist: info_data.as_deref(),
            code_resources,
        };
        let signed = sign_macho(&macho, &inputs, self.credentials)?;
        fs::write(path, signed)?;
        Ok(())
    }

    /// Dylibs are signed with only their file stem as identifier, no
    /// Info.plist or CodeResources slots.
    fn sign_dylib(&self, path: &Path) -> Result<()> {
        debug!(dylib = %path.display(), "signing standalone dylib");
        let macho = MachOFile::open(path)?;
        let identifier = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "dylib".to_string());
        let inputs = SigningInputs {
            identifier: &identifier,
            entitlements: Some(EMPTY_ENTITLEMENTS),
            ..Default::default()
        };
        let signed = sign_macho(&macho, &inputs, self.credentials)?;
        fs::write(path, signed)?;
        Ok(())
    }
}

fn is_bundle_dir(path: &Path) -> bool {
    path.extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_lowercase();
            matches!(ext.as_str(), "app" | "framework" | "appex")
        })
        .unwrap_or(false)
}

/// All bundles under `root` (inclusive), tagged with their nesting depth.
fn collect_bundles(root: &Path) -> Vec<(PathBuf, usize)> {
    let mut bundles = vec![(root.to_path_buf(), 0)];
    for entry in WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if path.is_dir() && is_bundle_dir(path) {
            let depth = path
                .strip_prefix(root)
                .unwrap_or(path)
                .iter()
                .filter(|c| {
                    let c = c.to_string_lossy();
                    c.ends_with(".app") || c.ends_with(".framework") || c.ends_with(".appex")
                })
                .count();
            bundles.push((path.to_path_buf(), depth));
        }
    }
    bundles
}

fn standalone_dylibs(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| {
            let path = e.path();
            path.is_file()
                && path.extension().is_some_and(|ext| ext == "dylib")
                && !path.components().any(|c| c.as_os_str() == "_CodeSignature")
        })
        .map(|e| e.into_path())
        .collect()
}

/// Mach-O files that belong directly to this bundle; files inside nested
/// bundles, the main executable, and dylibs (which keep the signature the
/// standalone pass gave them) are excluded.
fn immediate_machos(bundle: &Path, main_executable: &Path) -> Vec<PathBuf> {
    WalkDir::new(bundle)
        .into_iter()
        // The predicate also sees the root, which is itself a bundle dir.
        .filter_entry(|e| e.path() == bundle || !(e.path().is_dir() && is_bundle_dir(e.path())))
        .filter_map(|e| e.ok())
        .filter(|e| {
            let path = e.path();
            path.is_file()
                && path != main_executable
                && !path.extension().is_some_and(|ext| ext == "dylib")
                && !path.components().any(|c| c.as_os_str() == "_CodeSignature")
                && is_macho(path)
        })
        .map(|e| e.into_path())
        .collect()
}

/// Magic-byte sniff; FAT magics included.
fn is_macho(path: &Path) -> bool {
    let Ok(mut file) = fs::File::open(path) else {
        return false;
    };
    let mut magic = [0u8; 4];
    if file.read_exact(&mut magic).is_err() {
        return false;
    }
    matches!(
        magic,
        [0xfe, 0xed, 0xfa, 0xce]
            | [0xfe, 0xed, 0xfa, 0xcf]
            | [0xce, 0xfa, 0xed, 0xfe]
            | [0xcf, 0xfa, 0xed, 0xfe]
            | [0xca, 0xfe, 0xba, 0xbe]
            | [0xbe, 0xba, 0xfe, 0xca]
    )
}
