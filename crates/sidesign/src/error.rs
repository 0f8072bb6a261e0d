//! Error taxonomy for all sidesign operations.

use thiserror::Error;

/// Errors produced while rewriting or signing Mach-O files and bundles.
///
/// Everything public in this crate returns [`crate::Result<T>`] built on this
/// enum. Callers that only need a pass/fail answer can collapse it with
/// `is_ok()`; the variants exist for callers that want to distinguish bad
/// input from bad credentials.
#[derive(Debug, Error)]
pub enum Error {
    /// Filesystem access failed while reading inputs or writing results.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The input is not a Mach-O file this crate can process, or its load
    /// commands are malformed.
    #[error("invalid Mach-O: {0}")]
    MachO(String),

    /// A dylib load-command rewrite could not be applied (missing command,
    /// or not enough load-command space).
    #[error("dylib rewrite failed: {0}")]
    DylibRewrite(String),

    /// Signature construction or embedding failed.
    #[error("signing failed: {0}")]
    Signing(String),

    /// The certificate or private key could not be parsed or does not form
    /// a usable signing identity.
    #[error("invalid certificate: {0}")]
    Certificate(String),

    /// Wrong passphrase for the PKCS#12 container or private key.
    #[error("invalid password for private key or PKCS#12")]
    InvalidPassword,

    /// An operation needs credentials that were never configured on the
    /// [`crate::Signer`].
    #[error("missing credentials: {0}")]
    MissingCredentials(String),

    /// Conflicting or invalid [`crate::Signer`] configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The `.mobileprovision` file could not be parsed or carries no
    /// entitlements.
    #[error("invalid provisioning profile: {0}")]
    ProvisioningProfile(String),

    /// `Info.plist`, entitlements, or `CodeResources` plist handling failed.
    #[error("plist error: {0}")]
    Plist(#[from] plist::Error),

    /// IPA archive extraction or creation failed.
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Symbolic links inside the bundle cannot be recreated on this
    /// platform.
    #[error("symlink handling not supported on this platform")]
    SymlinkNotSupported,
}
