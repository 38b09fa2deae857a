//! Registry metadata access.
//!
//! The resolver and downloader only need two operations: list the
//! versions of a package, and fetch bytes from a URL. Everything else
//! about the wire format stays behind [`RegistryClient`].

pub mod http;

use std::collections::BTreeMap;

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::error::PantryError;
use crate::util::process::CancelFlag;
use crate::util::Integrity;

pub use http::HttpRegistry;

/// Metadata for one published version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionMetadata {
    /// Exact version
    pub version: Version,

    /// Artifact URL
    #[serde(default)]
    pub url: Option<String>,

    /// SHA-256 over the artifact, when the registry supplies one
    #[serde(default)]
    pub integrity: Option<Integrity>,

    /// Unix seconds of publication
    #[serde(default, rename = "publishedAt")]
    pub published_at: Option<u64>,

    /// Direct dependencies: name to constraint string
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,

    /// Declared binary entries (relative paths under the package root)
    #[serde(default)]
    pub binaries: Vec<String>,

    /// Environment variables the package publishes when active
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// All metadata the registry holds for one package name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageMetadata {
    /// Package name
    pub name: String,

    /// Published versions, ascending
    pub versions: Vec<VersionMetadata>,
}

impl PackageMetadata {
    /// Sort versions ascending; call after construction from the wire.
    pub fn normalize(mut self) -> Self {
        self.versions.sort_by(|a, b| a.version.cmp(&b.version));
        self
    }

    /// Metadata for one exact version.
    pub fn version(&self, version: &Version) -> Option<&VersionMetadata> {
        self.versions.iter().find(|v| &v.version == version)
    }
}

/// The seam between the resolver/downloader and the wire.
pub trait RegistryClient: Send + Sync {
    /// List versions for a package name.
    fn metadata(&self, name: &str) -> Result<PackageMetadata, PantryError>;

    /// Fetch raw bytes from a URL, single attempt. Implementations poll the
    /// cancellation flag between chunks.
    fn fetch(&self, url: &str, cancel: &CancelFlag) -> Result<Vec<u8>, PantryError>;
}
