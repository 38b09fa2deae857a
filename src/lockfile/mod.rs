//! Lockfile encoding and decoding.
//!
//! `pantry.lock` is the persisted record of the resolved graph. The
//! serialization is deterministic: keys sorted lexicographically, two-space
//! indent, trailing newline. Unknown future fields survive a round-trip,
//! and saving is atomic (write-temp-rename).

use std::collections::BTreeMap;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::SourceKind;
use crate::error::PantryError;
use crate::util::{fs as pantry_fs, Integrity};

/// Highest lockfile format version this implementation understands.
pub const LOCKFILE_VERSION: u32 = 1;

/// Lockfile file name within a project.
pub const LOCKFILE_NAME: &str = "pantry.lock";

/// One pinned package.
///
/// Field order is alphabetical so struct serialization matches the
/// sorted-keys rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockfileEntry {
    /// Direct dependencies: name to exact version
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,

    /// SHA-256 of the artifact, when one was downloaded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<Integrity>,

    /// Package name
    pub name: String,

    /// URL the artifact was actually fetched from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved: Option<String>,

    /// Source kind
    pub source: SourceKind,

    /// Declared artifact URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Exact version
    pub version: String,

    /// Unknown future fields, preserved
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// The whole lockfile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lockfile {
    /// Unix seconds at generation time
    pub generated_at: u64,

    /// Format version
    pub lockfile_version: u32,

    /// `name@version` to entry
    #[serde(default)]
    pub packages: BTreeMap<String, LockfileEntry>,

    /// Project version at generation time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_version: Option<String>,

    /// Unknown future fields, preserved
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Lockfile {
    /// A fresh, empty lockfile stamped with the current time.
    pub fn new(project_version: Option<String>) -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        Lockfile {
            generated_at: now,
            lockfile_version: LOCKFILE_VERSION,
            packages: BTreeMap::new(),
            project_version,
            extra: BTreeMap::new(),
        }
    }

    /// Load a lockfile, rejecting versions newer than we support.
    pub fn load(path: &Path) -> Result<Self, PantryError> {
        let content = std::fs::read_to_string(path).map_err(|e| PantryError::ManifestParse {
            reason: format!("failed to read {}: {e}", path.display()),
        })?;
        Self::parse(&content)
    }

    /// Parse lockfile content.
    pub fn parse(content: &str) -> Result<Self, PantryError> {
        let lockfile: Lockfile =
            serde_json::from_str(content).map_err(|e| PantryError::ManifestParse {
                reason: format!("invalid lockfile: {e}"),
            })?;

        if lockfile.lockfile_version > LOCKFILE_VERSION {
            return Err(PantryError::LockfileVersionMismatch {
                found: lockfile.lockfile_version,
                supported: LOCKFILE_VERSION,
            });
        }

        lockfile.validate()?;
        Ok(lockfile)
    }

    /// Load if the file exists.
    pub fn load_if_exists(path: &Path) -> Result<Option<Self>, PantryError> {
        if !path.exists() {
            return Ok(None);
        }
        Self::load(path).map(Some)
    }

    /// Serialize deterministically: sorted keys, pretty, trailing newline.
    pub fn serialize(&self) -> String {
        let mut out = serde_json::to_string_pretty(self).expect("lockfile serialization");
        out.push('\n');
        out
    }

    /// Save atomically.
    pub fn save(&self, path: &Path) -> Result<(), PantryError> {
        pantry_fs::atomic_write(path, self.serialize().as_bytes())
            .map_err(PantryError::Other)
    }

    /// The pinned version for a package name, if any entry matches.
    pub fn pinned_version(&self, name: &str) -> Option<semver::Version> {
        self.packages
            .values()
            .find(|e| e.name == name)
            .and_then(|e| e.version.parse().ok())
    }

    /// The entry for an exact `name@version` key.
    pub fn entry(&self, key: &str) -> Option<&LockfileEntry> {
        self.packages.get(key)
    }

    /// Whether two lockfiles pin the same package set.
    ///
    /// `generated_at` is ignored; used for the `--frozen` staleness check.
    pub fn same_packages(&self, other: &Lockfile) -> bool {
        self.packages == other.packages
    }

    /// Every referenced dependency must resolve to a key in the map.
    fn validate(&self) -> Result<(), PantryError> {
        for (key, entry) in &self.packages {
            for (dep_name, dep_version) in &entry.dependencies {
                let dep_key = format!("{dep_name}@{dep_version}");
                if !self.packages.contains_key(&dep_key) {
                    return Err(PantryError::ManifestParse {
                        reason: format!(
                            "lockfile entry `{key}` references missing `{dep_key}`"
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}
