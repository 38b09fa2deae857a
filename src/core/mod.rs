//! Core data model: manifests, dependencies, package identity, settings.

pub mod dependency;
pub mod manifest;
pub mod package_id;
pub mod settings;

pub use dependency::{DepKind, DependencyEdge, SourceKind};
pub use manifest::NormalizedManifest;
pub use package_id::PackageId;
pub use settings::{InstallSettings, LinkerStrategy, Npmrc, Settings};
