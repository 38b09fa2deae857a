//! Environment materialization.
//!
//! Packages extract into a staging directory in topological waves (a
//! wave's packages materialize in parallel, waves run in order), get
//! linked into `bin/`, `lib/`, and `share/` under the configured linker
//! strategy, and the staging directory is renamed into place only after
//! lifecycle scripts succeed. Any failure drops staging and leaves the
//! previous environment untouched.

pub mod linker;
pub mod shim;

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::cache::{ArtifactCache, ArtifactEntry};
use crate::core::{LinkerStrategy, NormalizedManifest, PackageId, SourceKind};
use crate::error::PantryError;
use crate::hooks::{self, HookOptions};
use crate::resolver::ResolvedGraph;
use crate::util::process::CancelFlag;
use crate::util::{fs as pantry_fs, paths, Fingerprint};

/// Name of the environment's metadata file.
pub const ENV_MANIFEST: &str = "manifest.json";

/// One installed package as recorded in the environment manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstalledPackage {
    pub name: String,
    pub version: String,
    /// Bytes on disk after extraction
    pub size: u64,
    /// Unix seconds
    pub installed_at: u64,
    /// Binary entries relative to the package root
    pub binaries: Vec<String>,
    /// Environment variables the package publishes
    pub env: BTreeMap<String, String>,
}

/// `manifest.json` at the root of every environment directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvManifest {
    /// `name@version` to record
    pub packages: BTreeMap<String, InstalledPackage>,

    /// Env vars declared by the project's services
    #[serde(default)]
    pub service_env: BTreeMap<String, String>,

    /// Absolute path of the project manifest this environment was built from
    pub source_manifest: PathBuf,

    /// Project manifest mtime (unix seconds) at install time
    pub source_mtime: u64,
}

impl EnvManifest {
    pub fn load(env_dir: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(env_dir.join(ENV_MANIFEST)).ok()?;
        serde_json::from_str(&content).ok()
    }

    pub fn save(&self, env_dir: &Path) -> Result<(), PantryError> {
        let json = serde_json::to_string_pretty(self).expect("env manifest serialization");
        pantry_fs::atomic_write(&env_dir.join(ENV_MANIFEST), json.as_bytes())
            .map_err(PantryError::Other)
    }

    /// Union of the env vars published by installed packages and services.
    pub fn package_env(&self) -> BTreeMap<String, String> {
        let mut merged = BTreeMap::new();
        for package in self.packages.values() {
            for (key, value) in &package.env {
                merged.insert(key.clone(), value.clone());
            }
        }
        for (key, value) in &self.service_env {
            merged.insert(key.clone(), value.clone());
        }
        merged
    }
}

/// Everything one install run needs.
pub struct InstallRequest<'a> {
    pub manifest: &'a NormalizedManifest,
    pub graph: &'a ResolvedGraph,
    pub artifacts: &'a HashMap<PackageId, ArtifactEntry>,
    pub cache: &'a ArtifactCache,
    pub environments_root: &'a Path,
    pub env_hash: Fingerprint,
    pub linker: LinkerStrategy,
    pub force: bool,
    pub hook_options: HookOptions,
    pub cancel: CancelFlag,
}

/// What an install run did.
#[derive(Debug)]
pub struct InstallOutcome {
    pub env_dir: PathBuf,
    /// False when the environment was already current and nothing was
    /// written.
    pub changed: bool,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn manifest_mtime_secs(path: &Path) -> u64 {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Materialize the resolved graph into its environment directory.
pub fn install(request: &InstallRequest<'_>) -> Result<InstallOutcome, PantryError> {
    let env_dir = request
        .environments_root
        .join(request.env_hash.to_hex());
    let source_mtime = manifest_mtime_secs(&request.manifest.path);

    // Idempotence: an environment built from this exact manifest state
    // with the same package set needs no writes
    if !request.force {
        if let Some(existing) = EnvManifest::load(&env_dir) {
            let current: Vec<String> =
                request.graph.sorted_ids().iter().map(|id| id.key()).collect();
            let installed: Vec<String> = existing.packages.keys().cloned().collect();
            if current == installed && existing.source_mtime == source_mtime {
                tracing::debug!("environment {} is current", env_dir.display());
                return Ok(InstallOutcome {
                    env_dir,
                    changed: false,
                });
            }
        }
    }

    pantry_fs::ensure_dir(request.environments_root).map_err(PantryError::Other)?;
    let staging = tempfile::Builder::new()
        .prefix(".staging-")
        .tempdir_in(request.environments_root)
        .map_err(|e| PantryError::Other(e.into()))?;
    let staging_root = staging.path();

    for sub in ["bin", "lib", "share", "packages"] {
        pantry_fs::ensure_dir(&staging_root.join(sub)).map_err(PantryError::Other)?;
    }

    // Extract in topological waves; packages within a wave are independent
    let levels = request.graph.topological_levels()?;
    for level in levels {
        level
            .par_iter()
            .try_for_each(|&id| materialize_one(request, staging_root, id))?;
    }

    // Deterministic link pass: shims and shared lib/share unions in
    // topological order
    let mut records = BTreeMap::new();
    for id in request.graph.topological_order()? {
        let record = link_one(request, staging_root, id)?;
        records.insert(id.key(), record);
    }

    let mut service_env = BTreeMap::new();
    for service in &request.manifest.services {
        for (key, value) in &service.env {
            service_env.insert(key.clone(), value.clone());
        }
    }

    let env_manifest = EnvManifest {
        packages: records,
        service_env,
        source_manifest: request.manifest.path.clone(),
        source_mtime,
    };
    env_manifest.save(staging_root)?;

    // Lifecycle scripts run against the staged tree; a failure unwinds
    // before anything replaces the previous environment
    let hook_env = hook_environment(staging_root, &env_manifest);
    hooks::run_install_phases(
        request.manifest,
        &hook_env,
        &request.hook_options,
        &request.cancel,
    )?;

    // Atomic swap: stage in, old environment out
    let staged = staging.into_path();
    let old = env_dir.with_extension("old");
    if env_dir.exists() {
        std::fs::rename(&env_dir, &old).map_err(|e| PantryError::Other(e.into()))?;
    }
    match std::fs::rename(&staged, &env_dir) {
        Ok(()) => {
            pantry_fs::remove_dir_all_if_exists(&old).map_err(PantryError::Other)?;
        }
        Err(e) => {
            // Restore the previous environment before surfacing
            if old.exists() {
                let _ = std::fs::rename(&old, &env_dir);
            }
            let _ = std::fs::remove_dir_all(&staged);
            return Err(PantryError::Other(e.into()));
        }
    }

    tracing::info!(
        "installed {} package(s) into {}",
        request.graph.len(),
        env_dir.display()
    );

    Ok(InstallOutcome {
        env_dir,
        changed: true,
    })
}

/// Remove an environment directory. Returns whether one existed.
pub fn uninstall(environments_root: &Path, env_hash: &Fingerprint) -> Result<bool, PantryError> {
    let env_dir = environments_root.join(env_hash.to_hex());
    if !env_dir.exists() {
        return Ok(false);
    }
    std::fs::remove_dir_all(&env_dir).map_err(|e| PantryError::Permission {
        path: format!("{}: {e}", env_dir.display()),
    })?;
    Ok(true)
}

/// Extract one package into its staging directory.
fn materialize_one(
    request: &InstallRequest<'_>,
    staging_root: &Path,
    id: PackageId,
) -> Result<(), PantryError> {
    if request.cancel.is_cancelled() {
        return Err(PantryError::Cancelled);
    }

    let package = request
        .graph
        .package(id)
        .expect("installer ids come from the graph");

    // Workspace-local packages are linked, never extracted
    if package.source == SourceKind::Local {
        return Ok(());
    }

    // The fetch pipeline must have run for every remote package
    if !request.artifacts.contains_key(&id) {
        return Err(PantryError::CacheCorrupt {
            reason: format!("no fetched artifact for {}", id.key()),
        });
    }

    let name = id.name().as_str();
    let version = id.version().to_string();
    let bytes = request
        .cache
        .read(name, &version)?
        .ok_or_else(|| PantryError::CacheCorrupt {
            reason: format!("artifact for {name}@{version} vanished from the store"),
        })?;

    let dest = staging_root.join(linker::package_rel_dir(request.linker, id));
    pantry_fs::ensure_dir(&dest).map_err(PantryError::Other)?;
    extract_tarball(&bytes, &dest)?;
    Ok(())
}

/// Link one package's binaries/libs/shares into the environment tree and
/// produce its manifest record.
fn link_one(
    request: &InstallRequest<'_>,
    staging_root: &Path,
    id: PackageId,
) -> Result<InstalledPackage, PantryError> {
    let package = request
        .graph
        .package(id)
        .expect("installer ids come from the graph");

    let (package_dir, package_rel): (PathBuf, PathBuf) = match package.source {
        SourceKind::Local => {
            let local = package
                .local_path
                .clone()
                .expect("local packages carry their path");
            (local.clone(), local)
        }
        _ => {
            let rel = linker::package_rel_dir(request.linker, id);
            (staging_root.join(&rel), rel)
        }
    };

    let mut binaries = package.binaries.clone();
    // Nothing declared (local packages, lockfile-only offline installs):
    // the package's bin/ contents are its binaries
    if binaries.is_empty() {
        if let Ok(entries) = std::fs::read_dir(package_dir.join("bin")) {
            let mut discovered: Vec<String> = entries
                .filter_map(Result::ok)
                .map(|e| format!("bin/{}", e.file_name().to_string_lossy()))
                .collect();
            discovered.sort();
            binaries.extend(discovered);
        }
    }

    for binary in &binaries {
        let file_name = Path::new(binary)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| binary.clone());
        let shim_path = staging_root.join("bin").join(&file_name);

        let target_rel = match package.source {
            // Shims for local packages point at the absolute member path
            SourceKind::Local => package_dir.join(binary).display().to_string(),
            _ => package_rel.join(binary).to_string_lossy().into_owned(),
        };

        shim::write(&shim_path, &target_rel, &package.env, request.force)
            .map_err(PantryError::Other)?;
    }

    if package.source != SourceKind::Local {
        linker::link_libs(&package_dir, &staging_root.join("lib"))
            .map_err(PantryError::Other)?;
        linker::link_share(&package_dir, &staging_root.join("share"))
            .map_err(PantryError::Other)?;
    }

    Ok(InstalledPackage {
        name: id.name().to_string(),
        version: id.version().to_string(),
        size: pantry_fs::dir_size(&package_dir),
        installed_at: now_secs(),
        binaries,
        env: package.env.clone(),
    })
}

/// Unpack a gzipped tarball. `tar` refuses entries that escape `dest`.
fn extract_tarball(bytes: &[u8], dest: &Path) -> Result<(), PantryError> {
    let decoder = flate2::read::GzDecoder::new(bytes);
    let mut archive = tar::Archive::new(decoder);
    archive.set_preserve_permissions(true);
    archive.unpack(dest).map_err(|e| PantryError::CacheCorrupt {
        reason: format!("failed to extract into {}: {e}", dest.display()),
    })
}

/// The environment lifecycle scripts run in: the staged `bin/` first on
/// PATH, the staged `lib/` on the loader path, plus package env vars.
fn hook_environment(staging_root: &Path, env_manifest: &EnvManifest) -> BTreeMap<String, String> {
    let mut env = env_manifest.package_env();

    let bin = staging_root.join("bin").display().to_string();
    let inherited = std::env::var("PATH").unwrap_or_default();
    env.insert(
        "PATH".to_string(),
        if inherited.is_empty() {
            bin
        } else {
            format!("{bin}:{inherited}")
        },
    );

    let lib_var = paths::library_path_var();
    let lib = staging_root.join("lib").display().to_string();
    match std::env::var(lib_var) {
        Ok(existing) if !existing.is_empty() && lib_var != "PATH" => {
            env.insert(lib_var.to_string(), format!("{lib}:{existing}"));
        }
        _ if lib_var != "PATH" => {
            env.insert(lib_var.to_string(), lib);
        }
        _ => {}
    }

    env
}
