//! Package identity - WHAT package (name + version).
//!
//! A `PackageId` is an interned `(name, version)` pair, so identities
//! clone and compare at pointer cost throughout the resolver. The pair
//! interner is the shared [`Interner`]; names inside it are already
//! interned [`PackageName`]s.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::LazyLock;

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::util::interning::{Interner, PackageName};

/// Global interner for `(name, version)` pairs
static PACKAGE_IDS: LazyLock<Interner<PackageIdInner>> = LazyLock::new(Interner::new);

/// A unique identifier for a package (interned).
///
/// Cheap to clone and compare; the same `(name, version)` pair always
/// yields the same pointer.
#[derive(Clone, Copy)]
pub struct PackageId {
    inner: &'static PackageIdInner,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PackageIdInner {
    name: PackageName,
    version: Version,
}

impl PackageId {
    /// Create a new package ID.
    pub fn new(name: impl Into<PackageName>, version: Version) -> Self {
        let inner = PackageIdInner {
            name: name.into(),
            version,
        };

        PackageId {
            inner: PACKAGE_IDS.intern(&inner, PackageIdInner::clone),
        }
    }

    /// Parse a `name@version` key.
    pub fn parse_key(key: &str) -> Option<Self> {
        let (name, version) = key.rsplit_once('@')?;
        if name.is_empty() {
            return None;
        }
        let version: Version = version.parse().ok()?;
        Some(PackageId::new(name, version))
    }

    /// Get the package name.
    pub fn name(&self) -> PackageName {
        self.inner.name
    }

    /// Get the package version.
    pub fn version(&self) -> &Version {
        &self.inner.version
    }

    /// The `name@version` key used by the lockfile and the artifact store.
    pub fn key(&self) -> String {
        format!("{}@{}", self.inner.name, self.inner.version)
    }
}

impl PartialEq for PackageId {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.inner, other.inner)
    }
}

impl Eq for PackageId {}

impl Hash for PackageId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(self.inner, state)
    }
}

impl PartialOrd for PackageId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.inner
            .name
            .cmp(&other.inner.name)
            .then_with(|| self.inner.version.cmp(&other.inner.version))
    }
}

impl fmt::Debug for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackageId")
            .field("name", &self.inner.name.as_str())
            .field("version", &self.inner.version)
            .finish()
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.inner.name, self.inner.version)
    }
}

impl Serialize for PackageId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.key().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PackageId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let key = String::deserialize(deserializer)?;
        PackageId::parse_key(&key)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid package key `{key}`")))
    }
}
