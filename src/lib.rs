//! Pantry - a cross-project dependency manager
//!
//! This crate provides the core library functionality for Pantry:
//! manifest normalization, dependency resolution, the artifact and
//! environment caches, the download/verify/install pipeline, and the
//! shell activation hook.

pub mod activation;
pub mod cache;
pub mod core;
pub mod error;
pub mod fetch;
pub mod hooks;
pub mod install;
pub mod lockfile;
pub mod ops;
pub mod registry;
pub mod resolver;
pub mod util;

/// Test utilities and mocks for Pantry unit tests.
///
/// Only available under `cfg(test)`. Provides an in-memory registry
/// with request accounting and tarball fixtures.
#[cfg(test)]
pub mod test_support;

pub use crate::core::{
    DepKind, DependencyEdge, InstallSettings, LinkerStrategy, NormalizedManifest, Npmrc,
    PackageId, Settings, SourceKind,
};

pub use error::{PantryError, PantryResult};
pub use lockfile::Lockfile;
pub use resolver::{ResolvedGraph, Resolver};
pub use util::{Fingerprint, Integrity, PackageName};
