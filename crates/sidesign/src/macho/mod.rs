//! Mach-O parsing, load-command rewriting, and signature embedding.

pub mod dylib;
pub mod layout;
pub mod parser;
pub mod signer;
pub mod writer;

pub use dylib::{change_dylib_path, inject_dylib};
pub use parser::MachOFile;
pub use signer::{sign_macho, SigningInputs};
