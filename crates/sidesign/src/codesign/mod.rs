//! Embedded code-signature data structures (CodeDirectory, SuperBlob, DER
//! entitlements) and the constants describing their on-disk layout.

pub mod code_directory;
pub mod constants;
pub mod der;
pub mod superblob;

pub use code_directory::{cdhash_sha1, cdhash_sha256, CodeDirectoryBuilder, DigestKind};
pub use superblob::SuperBlob;
