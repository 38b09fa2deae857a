//! Shared utilities: hashing, interning, paths, filesystem, processes.

pub mod diagnostic;
pub mod fingerprint;
pub mod fs;
pub mod hash;
pub mod interning;
pub mod jsonc;
pub mod paths;
pub mod process;

pub use fingerprint::Fingerprint;
pub use hash::Integrity;
pub use interning::{Interner, PackageName};
