//! Precache manifest compilation split into focused submodules for easier testing.

mod compile;
mod document;
mod fingerprint;

pub use compile::compile_manifest;
pub use fingerprint::{derive_version, fingerprint_bytes, fingerprint_file};
