//! IPA archive handling: extraction into a working directory and
//! repacking once the bundle is signed.

pub mod archive;
pub mod extract;

pub use archive::{create_ipa, CompressionLevel};
pub use extract::{extract_ipa, validate_ipa};
