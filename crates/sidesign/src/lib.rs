//! iOS code signing and Mach-O editing.
//!
//! The crate covers three operations: injecting dylib load commands into
//! Mach-O files, rewriting existing dylib load paths, and signing app
//! bundles or `.ipa` archives with an Apple distribution identity.
//!
//! [`Signer`] is the high-level entry point for signing; the Mach-O
//! editing operations are [`macho::inject_dylib`] and
//! [`macho::change_dylib_path`].
//!
//! ```no_run
//! use secrecy::SecretString;
//! use sidesign::Signer;
//!
//! let password = SecretString::from("p12 password".to_string());
//! Signer::new()
//!     .pkcs12_file("identity.p12", &password)?
//!     .provisioning_profile_file("app.mobileprovision")?
//!     .bundle_id("com.example.resigned")
//!     .sign_ipa("input.ipa", "output.ipa")?;
//! # Ok::<(), sidesign::Error>(())
//! ```

pub mod bundle;
pub mod codesign;
pub mod crypto;
pub mod error;
pub mod ipa;
pub mod macho;

use std::path::Path;

use secrecy::{ExposeSecret, SecretString};
use tracing::info;

pub use bundle::{BundleSigner, CodeResourcesBuilder, InfoOverrides};
pub use crypto::{ProvisioningProfile, SigningCredentials};
pub use error::Error;
pub use ipa::{create_ipa, extract_ipa, validate_ipa, CompressionLevel};
pub use macho::{change_dylib_path, inject_dylib};

pub type Result<T> = std::result::Result<T, Error>;

/// Builder for signing app bundles and IPA archives.
///
/// Credentials are mandatory for [`sign_app`](Self::sign_app) and
/// [`sign_ipa`](Self::sign_ipa); metadata overrides and the provisioning
/// profile are optional. Empty override strings are treated as unset, so
/// callers can pass user input through unconditionally.
#[derive(Default)]
pub struct Signer {
    credentials: Option<SigningCredentials>,
    profile: Option<ProvisioningProfile>,
    overrides: InfoOverrides,
    compression: CompressionLevel,
}

fn non_empty(value: impl Into<String>) -> Option<String> {
    let value = value.into();
    (!value.is_empty()).then_some(value)
}

impl Signer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use already-loaded credentials.
    pub fn credentials(mut self, credentials: SigningCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Load credentials from a PKCS#12 container.
    pub fn pkcs12_file(mut self, path: impl AsRef<Path>, password: &SecretString) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        self.credentials = Some(SigningCredentials::from_p12(
            &data,
            password.expose_secret(),
        )?);
        Ok(self)
    }

    /// Load credentials from PEM certificate and private key files.
    pub fn pem_files(
        mut self,
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
    ) -> Result<Self> {
        let cert = std::fs::read(cert_path.as_ref())?;
        let key = std::fs::read(key_path.as_ref())?;
        self.credentials = Some(SigningCredentials::from_pem(&cert, &key)?);
        Ok(self)
    }

    /// Load the provisioning profile to embed and take entitlements from.
    pub fn provisioning_profile_file(mut self, path: impl AsRef<Path>) -> Result<Self> {
        self.profile = Some(ProvisioningProfile::open(path.as_ref())?);
        Ok(self)
    }

    pub fn provisioning_profile(mut self, profile: ProvisioningProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    /// Override CFBundleIdentifier. An empty string leaves it unchanged.
    pub fn bundle_id(mut self, id: impl Into<String>) -> Self {
        self.overrides.bundle_id = non_empty(id);
        self
    }

    /// Override CFBundleDisplayName. An empty string leaves it unchanged.
    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.overrides.display_name = non_empty(name);
        self
    }

    /// Override both CFBundleShortVersionString and CFBundleVersion. An
    /// empty string leaves them unchanged.
    pub fn bundle_version(mut self, version: impl Into<String>) -> Self {
        self.overrides.bundle_version = non_empty(version);
        self
    }

    /// Zip level for IPA output, clamped to 0..=9.
    pub fn compression_level(mut self, level: u32) -> Self {
        self.compression = CompressionLevel::new(level);
        self
    }

    /// Check that the configuration can sign anything.
    pub fn validate(&self) -> Result<()> {
        if self.credentials.is_none() {
            return Err(Error::MissingCredentials(
                "no signing identity configured; supply a PKCS#12 file or a PEM pair".into(),
            ));
        }
        Ok(())
    }

    fn bundle_signer(&self) -> Result<BundleSigner<'_>> {
        self.validate()?;
        let mut signer = BundleSigner::new(self.credentials.as_ref());
        if let Some(profile) = &self.profile {
            signer = signer.provisioning_profile(profile);
        }
        Ok(signer.overrides(self.overrides.clone()))
    }

    /// Sign an extracted `.app` directory in place.
    pub fn sign_app(&self, bundle_path: impl AsRef<Path>) -> Result<()> {
        let bundle_path = bundle_path.as_ref();
        info!(bundle = %bundle_path.display(), "signing app bundle");
        self.bundle_signer()?.sign_app(bundle_path)
    }

    /// Extract `input`, sign the bundle, and repack it at `output`.
    pub fn sign_ipa(&self, input: impl AsRef<Path>, output: impl AsRef<Path>) -> Result<()> {
        let input = input.as_ref();
        let output = output.as_ref();
        let signer = self.bundle_signer()?;

        validate_ipa(input)?;
        let workdir = tempfile::TempDir::new()?;
        let bundle = extract_ipa(input, workdir.path())?;
        info!(bundle = %bundle.display(), "signing extracted bundle");
        signer.sign_app(&bundle)?;
        create_ipa(&bundle, output, self.compression)?;
        info!(output = %output.display(), "wrote signed archive");
        Ok(())
    }
}
