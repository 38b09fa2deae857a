//! Project manifest loading and normalization.
//!
//! Pantry reads `pantry.json`, the commented `pantry.jsonc` variant, or a
//! host `package.json` as a fallback. All formats normalize into one
//! in-memory shape; unknown fields are preserved so round-tripping does
//! not destroy data.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::dependency::{
    edge_from_bare, edge_from_value, DepKind, DependencyEdge, DependencyValue,
};
use crate::error::PantryError;
use crate::util::jsonc;

/// Manifest file names, in lookup order.
pub const MANIFEST_FILES: &[&str] = &["pantry.json", "pantry.jsonc", "package.json"];

/// A long-running process declared by the project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDecl {
    /// Service name
    pub name: String,

    /// Command line to launch it
    pub command: String,

    /// Extra environment for the service
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// The normalized in-memory manifest.
#[derive(Debug, Clone)]
pub struct NormalizedManifest {
    /// Project name
    pub name: String,

    /// Project version, if declared
    pub version: Option<Version>,

    /// Script name to command line
    pub scripts: BTreeMap<String, String>,

    /// All dependency edges, in declaration order (normal, dev, peer, optional)
    pub dependencies: Vec<DependencyEdge>,

    /// Declared services
    pub services: Vec<ServiceDecl>,

    /// Workspace glob patterns
    pub workspaces: Vec<String>,

    /// Publisher configuration, passed through opaquely
    pub publisher: Option<Value>,

    /// Per-scope registry overrides
    pub registry_overrides: BTreeMap<String, String>,

    /// Concurrency hint for the downloader/installer
    pub concurrency: Option<usize>,

    /// Candidate versions younger than this many seconds are skipped
    pub minimum_release_age: u64,

    /// Package names exempt from the release-age policy
    pub minimum_release_age_excludes: Vec<String>,

    /// Unknown fields, preserved for round-tripping
    pub extra: serde_json::Map<String, Value>,

    /// Absolute path of the manifest file
    pub path: PathBuf,

    /// Canonical serialization of the parsed manifest, used for env hashing
    pub normalized_content: String,
}

impl NormalizedManifest {
    /// The directory containing this manifest.
    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or(Path::new("."))
    }

    /// Edges of one kind, in declaration order.
    pub fn edges_of(&self, kind: DepKind) -> impl Iterator<Item = &DependencyEdge> {
        self.dependencies.iter().filter(move |e| e.kind == kind)
    }
}

/// A dependency section value: table, bare array, or one string line.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DependencySection {
    Table(serde_json::Map<String, Value>),
    List(Vec<String>),
    Line(String),
}

/// A service declaration value: command string or detailed object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ServiceValue {
    Command(String),
    Detailed {
        command: String,
        #[serde(default)]
        env: BTreeMap<String, String>,
    },
}

/// Raw manifest as deserialized from JSON.
#[derive(Debug, Deserialize)]
struct RawManifest {
    #[serde(default)]
    name: Option<String>,

    #[serde(default)]
    version: Option<String>,

    #[serde(default)]
    scripts: BTreeMap<String, String>,

    #[serde(default)]
    dependencies: Option<DependencySection>,

    #[serde(default, rename = "devDependencies")]
    dev_dependencies: Option<DependencySection>,

    #[serde(default, rename = "peerDependencies")]
    peer_dependencies: Option<DependencySection>,

    #[serde(default, rename = "optionalDependencies")]
    optional_dependencies: Option<DependencySection>,

    #[serde(default)]
    services: Option<serde_json::Map<String, Value>>,

    #[serde(default)]
    workspaces: Vec<String>,

    #[serde(default)]
    publisher: Option<Value>,

    #[serde(default)]
    registries: BTreeMap<String, String>,

    #[serde(default)]
    concurrency: Option<usize>,

    #[serde(default, rename = "minimumReleaseAge")]
    minimum_release_age: Option<u64>,

    #[serde(default, rename = "minimumReleaseAgeExcludes")]
    minimum_release_age_excludes: Vec<String>,

    #[serde(flatten)]
    extra: serde_json::Map<String, Value>,
}

/// Locate a manifest in `dir` (no upward search).
pub fn manifest_in(dir: &Path) -> Option<PathBuf> {
    MANIFEST_FILES
        .iter()
        .map(|f| dir.join(f))
        .find(|p| p.is_file())
}

/// Walk upward from `start` to locate the nearest manifest.
pub fn find_manifest(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();
    loop {
        if let Some(path) = manifest_in(&current) {
            return Some(path);
        }
        if !current.pop() {
            return None;
        }
    }
}

/// Load and normalize the manifest for a project root.
pub fn load(project_root: &Path) -> Result<NormalizedManifest, PantryError> {
    let path = manifest_in(project_root).ok_or_else(|| PantryError::ManifestParse {
        reason: format!("no manifest found in {}", project_root.display()),
    })?;
    load_path(&path)
}

/// Load and normalize a specific manifest file.
pub fn load_path(path: &Path) -> Result<NormalizedManifest, PantryError> {
    let content = std::fs::read_to_string(path).map_err(|e| PantryError::ManifestParse {
        reason: format!("failed to read {}: {e}", path.display()),
    })?;
    parse(&content, path)
}

/// Parse manifest content. The `.jsonc` extension enables comment stripping.
pub fn parse(content: &str, path: &Path) -> Result<NormalizedManifest, PantryError> {
    let is_jsonc = path.extension().is_some_and(|e| e == "jsonc");
    let json = if is_jsonc {
        jsonc::strip_comments(content)
    } else {
        content.to_string()
    };

    let value: Value = serde_json::from_str(&json).map_err(|e| PantryError::ManifestParse {
        reason: format!("{}: {e}", path.display()),
    })?;

    // Canonical content used for the environment hash: re-serialized parsed
    // value, so formatting and comments do not affect the key
    let normalized_content =
        serde_json::to_string(&value).map_err(|e| PantryError::ManifestParse {
            reason: e.to_string(),
        })?;

    let raw: RawManifest =
        serde_json::from_value(value).map_err(|e| PantryError::ManifestParse {
            reason: format!("{}: {e}", path.display()),
        })?;

    let version: Option<Version> = match &raw.version {
        Some(v) => Some(v.parse().map_err(|_| PantryError::ManifestParse {
            reason: format!("invalid version `{v}`"),
        })?),
        None => None,
    };

    let mut dependencies = Vec::new();
    collect_edges(&mut dependencies, raw.dependencies, DepKind::Normal)?;
    collect_edges(&mut dependencies, raw.dev_dependencies, DepKind::Dev)?;
    collect_edges(&mut dependencies, raw.peer_dependencies, DepKind::Peer)?;
    collect_edges(&mut dependencies, raw.optional_dependencies, DepKind::Optional)?;

    let mut services = Vec::new();
    if let Some(decls) = raw.services {
        for (name, value) in decls {
            let parsed: ServiceValue =
                serde_json::from_value(value).map_err(|e| PantryError::ManifestParse {
                    reason: format!("service `{name}`: {e}"),
                })?;
            services.push(match parsed {
                ServiceValue::Command(command) => ServiceDecl {
                    name,
                    command,
                    env: BTreeMap::new(),
                },
                ServiceValue::Detailed { command, env } => ServiceDecl { name, command, env },
            });
        }
    }

    for pattern in &raw.workspaces {
        if pattern.contains("..") {
            return Err(PantryError::ManifestParse {
                reason: format!("workspace pattern `{pattern}` must not contain `..`"),
            });
        }
    }

    let name = raw.name.unwrap_or_else(|| {
        path.parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".to_string())
    });

    Ok(NormalizedManifest {
        name,
        version,
        scripts: raw.scripts,
        dependencies,
        services,
        workspaces: raw.workspaces,
        publisher: raw.publisher,
        registry_overrides: raw.registries,
        concurrency: raw.concurrency,
        minimum_release_age: raw.minimum_release_age.unwrap_or(0),
        minimum_release_age_excludes: raw.minimum_release_age_excludes,
        extra: raw.extra,
        path: path.to_path_buf(),
        normalized_content,
    })
}

fn collect_edges(
    out: &mut Vec<DependencyEdge>,
    section: Option<DependencySection>,
    kind: DepKind,
) -> Result<(), PantryError> {
    let start = out.len();

    match section {
        None => {}
        Some(DependencySection::Table(table)) => {
            for (name, value) in table {
                let parsed: DependencyValue =
                    serde_json::from_value(value).map_err(|_| {
                        PantryError::UnknownDependencyFormat { name: name.clone() }
                    })?;
                out.push(edge_from_value(&name, &parsed, kind)?);
            }
        }
        Some(DependencySection::List(entries)) => {
            for entry in entries {
                out.push(edge_from_bare(&entry, kind)?);
            }
        }
        Some(DependencySection::Line(line)) => {
            for entry in line.split_whitespace() {
                out.push(edge_from_bare(entry, kind)?);
            }
        }
    }

    // Names must be unique within a kind
    let added = &out[start..];
    for (i, edge) in added.iter().enumerate() {
        if added[..i].iter().any(|e| e.name == edge.name) {
            return Err(PantryError::ManifestParse {
                reason: format!(
                    "duplicate {} dependency `{}`",
                    kind.as_str(),
                    edge.name
                ),
            });
        }
    }

    Ok(())
}
