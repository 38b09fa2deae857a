//! Shell activation: directory in, `{PATH, env}` payload out.
//!
//! The hit path costs one `stat` on the manifest and a ring-buffer scan,
//! nothing else: the environment hash is memoized per manifest path and
//! reused while the mtime and size are unchanged, and the cache lookup
//! validates against that same observed mtime instead of stat-ing again.
//! Manifest content is read and rehashed only when the stat disagrees
//! with the memo. On a miss the payload is rebuilt from the environment
//! directory's own manifest; a full install is triggered only when the
//! project manifest changed since the environment was materialized. The
//! hook never touches the network on its own.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::cache::environment::{EnvCache, EnvCacheEntry, EnvSnapshot, DEFAULT_TTL};
use crate::core::manifest;
use crate::error::PantryError;
use crate::install::EnvManifest;
use crate::util::{paths, Fingerprint};

/// What the hook tells the shell to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Activation {
    /// No manifest above this directory; leave the shell alone.
    NoProject,

    /// Apply this payload.
    Activate(EnvSnapshot),
}

/// Hook configuration.
#[derive(Debug, Clone)]
pub struct HookConfig {
    /// Environments directory
    pub environments_root: PathBuf,

    /// Entry TTL (`PANTRY_CACHE_TTL` override applied by the caller)
    pub ttl: Duration,

    /// Bypass the environment cache (`PANTRY_NO_CACHE`)
    pub no_cache: bool,
}

impl Default for HookConfig {
    fn default() -> Self {
        HookConfig {
            environments_root: paths::environments_root(),
            ttl: DEFAULT_TTL,
            no_cache: false,
        }
    }
}

/// Memoized environment hash for one manifest path, valid while the
/// manifest's mtime and size are unchanged.
#[derive(Debug, Clone, Copy)]
struct HashMemo {
    mtime: SystemTime,
    size: u64,
    hash: Fingerprint,
}

/// The directory-change hook.
pub struct ActivationHook<'a> {
    cache: &'a EnvCache,
    config: HookConfig,
    /// Manifest path to memoized hash
    hash_memo: RwLock<HashMap<PathBuf, HashMemo>>,
}

impl<'a> ActivationHook<'a> {
    pub fn new(cache: &'a EnvCache, config: HookConfig) -> Self {
        ActivationHook {
            cache,
            config,
            hash_memo: RwLock::new(HashMap::new()),
        }
    }

    /// Compute the environment hash for a manifest file.
    ///
    /// `fingerprint(absolute path ∥ manifest bytes)`: hashing the raw
    /// bytes keeps the hook free of JSON parsing, and any content change
    /// (even with a preserved mtime) changes the key whenever the hash
    /// is recomputed.
    pub fn env_hash(manifest_path: &Path, content: &[u8]) -> Fingerprint {
        let canonical = crate::util::fs::normalize_path(manifest_path);
        Fingerprint::of_parts(canonical.display().to_string().as_bytes(), content)
    }

    /// Answer a directory change. `needs_install` is invoked when the
    /// project manifest is newer than its materialized environment; it
    /// must materialize the environment and return, after which the
    /// payload is rebuilt from disk.
    pub fn activate(
        &self,
        dir: &Path,
        needs_install: &mut dyn FnMut(&Path, &Fingerprint) -> Result<(), PantryError>,
    ) -> Result<Activation, PantryError> {
        let Some(manifest_path) = manifest::find_manifest(dir) else {
            return Ok(Activation::NoProject);
        };

        // The single stat of the hit path
        let meta = std::fs::metadata(&manifest_path).map_err(|e| PantryError::ManifestParse {
            reason: format!("{}: {e}", manifest_path.display()),
        })?;
        let mtime = meta.modified().map_err(|e| PantryError::Other(e.into()))?;

        let hash = match self.memoized_hash(&manifest_path, mtime, meta.len()) {
            Some(hash) => hash,
            None => self.rehash(&manifest_path, mtime, meta.len())?,
        };

        if !self.config.no_cache {
            if let Some(snapshot) = self.cache.get_fresh(&hash, mtime) {
                return Ok(Activation::Activate(snapshot));
            }
        }

        let env_dir = self.config.environments_root.join(hash.to_hex());
        let current_mtime = to_unix_secs(mtime);

        let stale = match EnvManifest::load(&env_dir) {
            Some(env_manifest) => env_manifest.source_mtime != current_mtime,
            None => true,
        };
        if stale {
            needs_install(&manifest_path, &hash)?;
        }

        let env_manifest =
            EnvManifest::load(&env_dir).ok_or_else(|| PantryError::CacheCorrupt {
                reason: format!(
                    "environment {} has no manifest after install",
                    env_dir.display()
                ),
            })?;

        let snapshot = build_payload(&env_dir, &env_manifest);

        if !self.config.no_cache {
            let entry = EnvCacheEntry::new(
                hash,
                manifest_path,
                snapshot.path_value.clone(),
                snapshot.env_vars.clone(),
                self.config.ttl,
            )
            .map_err(|e| PantryError::Other(e.into()))?;
            self.cache.insert(entry);
        }

        Ok(Activation::Activate(snapshot))
    }

    /// The memoized hash, if the stat still matches it.
    fn memoized_hash(&self, path: &Path, mtime: SystemTime, size: u64) -> Option<Fingerprint> {
        let memo = self.hash_memo.read().unwrap();
        memo.get(path)
            .filter(|m| m.mtime == mtime && m.size == size)
            .map(|m| m.hash)
    }

    /// Read the manifest, hash it, and refresh the memo.
    fn rehash(
        &self,
        path: &Path,
        mtime: SystemTime,
        size: u64,
    ) -> Result<Fingerprint, PantryError> {
        let content = std::fs::read(path).map_err(|e| PantryError::ManifestParse {
            reason: format!("{}: {e}", path.display()),
        })?;
        let hash = Self::env_hash(path, &content);

        let mut memo = self.hash_memo.write().unwrap();
        memo.insert(path.to_path_buf(), HashMemo { mtime, size, hash });
        Ok(hash)
    }
}

fn to_unix_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Assemble the activation payload for a materialized environment.
fn build_payload(env_dir: &Path, env_manifest: &EnvManifest) -> EnvSnapshot {
    let bin = env_dir.join("bin").display().to_string();
    let inherited = std::env::var("PATH").unwrap_or_default();
    let path_value = if inherited.is_empty() {
        bin
    } else {
        format!("{bin}:{inherited}")
    };

    let mut env_vars = env_manifest.package_env();

    let lib_var = paths::library_path_var();
    if lib_var != "PATH" {
        let lib = env_dir.join("lib").display().to_string();
        let value = match std::env::var(lib_var) {
            Ok(existing) if !existing.is_empty() => format!("{lib}:{existing}"),
            _ => lib,
        };
        env_vars.insert(lib_var.to_string(), value);
    }

    EnvSnapshot {
        path_value,
        env_vars,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::install::InstalledPackage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn mtime_secs(path: &Path) -> u64 {
        std::fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .map(to_unix_secs)
            .unwrap_or(0)
    }

    fn seed_environment(envs: &Path, hash: &Fingerprint, manifest_path: &Path) -> PathBuf {
        let env_dir = envs.join(hash.to_hex());
        std::fs::create_dir_all(env_dir.join("bin")).unwrap();
        std::fs::create_dir_all(env_dir.join("lib")).unwrap();

        let env_manifest = EnvManifest {
            packages: BTreeMap::from([(
                "a@1.0.0".to_string(),
                InstalledPackage {
                    name: "a".to_string(),
                    version: "1.0.0".to_string(),
                    size: 10,
                    installed_at: 1,
                    binaries: vec!["bin/a".to_string()],
                    env: BTreeMap::from([("A_HOME".to_string(), "/opt/a".to_string())]),
                },
            )]),
            service_env: BTreeMap::new(),
            source_manifest: manifest_path.to_path_buf(),
            source_mtime: mtime_secs(manifest_path),
        };
        env_manifest.save(&env_dir).unwrap();
        env_dir
    }

    #[test]
    fn test_no_manifest_is_a_noop() {
        let tmp = TempDir::new().unwrap();
        let cache = EnvCache::new();
        let hook = ActivationHook::new(
            &cache,
            HookConfig {
                environments_root: tmp.path().join("envs"),
                ..Default::default()
            },
        );

        let activation = hook
            .activate(tmp.path(), &mut |_, _| panic!("no install expected"))
            .unwrap();
        assert_eq!(activation, Activation::NoProject);
    }

    #[test]
    fn test_payload_built_from_env_manifest() {
        let tmp = TempDir::new().unwrap();
        let project = tmp.path().join("proj");
        std::fs::create_dir_all(&project).unwrap();
        let manifest_path = project.join("pantry.json");
        std::fs::write(&manifest_path, r#"{"name":"p"}"#).unwrap();

        let envs = tmp.path().join("envs");
        let content = std::fs::read(&manifest_path).unwrap();
        let hash = ActivationHook::env_hash(&manifest_path, &content);
        let env_dir = seed_environment(&envs, &hash, &manifest_path);

        let cache = EnvCache::new();
        let hook = ActivationHook::new(
            &cache,
            HookConfig {
                environments_root: envs,
                ..Default::default()
            },
        );

        let activation = hook
            .activate(&project, &mut |_, _| panic!("environment is current"))
            .unwrap();

        let Activation::Activate(snapshot) = activation else {
            panic!("expected a payload");
        };
        assert!(snapshot
            .path_value
            .starts_with(&env_dir.join("bin").display().to_string()));
        assert_eq!(snapshot.env_vars["A_HOME"], "/opt/a");
        if paths::library_path_var() != "PATH" {
            assert!(snapshot.env_vars[paths::library_path_var()]
                .contains(&env_dir.join("lib").display().to_string()));
        }
    }

    #[test]
    fn test_second_activation_hits_the_cache() {
        let tmp = TempDir::new().unwrap();
        let project = tmp.path().join("proj");
        std::fs::create_dir_all(&project).unwrap();
        let manifest_path = project.join("pantry.json");
        std::fs::write(&manifest_path, r#"{"name":"p"}"#).unwrap();

        let envs = tmp.path().join("envs");
        let content = std::fs::read(&manifest_path).unwrap();
        let hash = ActivationHook::env_hash(&manifest_path, &content);
        let env_dir = seed_environment(&envs, &hash, &manifest_path);

        let cache = EnvCache::new();
        let hook = ActivationHook::new(
            &cache,
            HookConfig {
                environments_root: envs,
                ..Default::default()
            },
        );

        let first = hook.activate(&project, &mut |_, _| Ok(())).unwrap();
        assert_eq!(cache.len(), 1);

        // Remove the environment manifest: a true cache hit never reads it
        std::fs::remove_file(env_dir.join(crate::install::ENV_MANIFEST)).unwrap();
        let second = hook.activate(&project, &mut |_, _| panic!("cached")).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_cache_hit_does_not_read_the_manifest() {
        let tmp = TempDir::new().unwrap();
        let project = tmp.path().join("proj");
        std::fs::create_dir_all(&project).unwrap();
        let manifest_path = project.join("pantry.json");
        std::fs::write(&manifest_path, r#"{"name":"p"}"#).unwrap();

        let envs = tmp.path().join("envs");
        let content = std::fs::read(&manifest_path).unwrap();
        let hash = ActivationHook::env_hash(&manifest_path, &content);
        seed_environment(&envs, &hash, &manifest_path);

        let cache = EnvCache::new();
        let hook = ActivationHook::new(
            &cache,
            HookConfig {
                environments_root: envs,
                ..Default::default()
            },
        );

        let first = hook.activate(&project, &mut |_, _| Ok(())).unwrap();

        // Rewrite the manifest with different bytes of the same length
        // and put the mtime back: a stat cannot tell the difference, so
        // the hit path must serve the memoized hash without reading
        let mtime = std::fs::metadata(&manifest_path).unwrap().modified().unwrap();
        std::fs::write(&manifest_path, r#"{"name":"q"}"#).unwrap();
        let file = std::fs::OpenOptions::new()
            .write(true)
            .open(&manifest_path)
            .unwrap();
        file.set_modified(mtime).unwrap();
        drop(file);

        let second = hook.activate(&project, &mut |_, _| panic!("cached")).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_fresh_hook_detects_content_change_with_preserved_mtime() {
        let tmp = TempDir::new().unwrap();
        let project = tmp.path().join("proj");
        std::fs::create_dir_all(&project).unwrap();
        let manifest_path = project.join("pantry.json");
        std::fs::write(&manifest_path, r#"{"name":"p"}"#).unwrap();

        let envs = tmp.path().join("envs");
        let content = std::fs::read(&manifest_path).unwrap();
        let hash = ActivationHook::env_hash(&manifest_path, &content);
        seed_environment(&envs, &hash, &manifest_path);

        // Same-length content swap with the original mtime restored
        let mtime = std::fs::metadata(&manifest_path).unwrap().modified().unwrap();
        std::fs::write(&manifest_path, r#"{"name":"q"}"#).unwrap();
        let file = std::fs::OpenOptions::new()
            .write(true)
            .open(&manifest_path)
            .unwrap();
        file.set_modified(mtime).unwrap();
        drop(file);

        // A hook with no memo rehashes the content, lands on a different
        // environment hash, and must install
        let installs = AtomicUsize::new(0);
        let cache = EnvCache::new();
        let hook = ActivationHook::new(
            &cache,
            HookConfig {
                environments_root: envs.clone(),
                ..Default::default()
            },
        );

        hook.activate(&project, &mut |path, new_hash| {
            installs.fetch_add(1, Ordering::SeqCst);
            assert_ne!(new_hash, &hash);
            seed_environment(&envs, new_hash, path);
            Ok(())
        })
        .unwrap();

        assert_eq!(installs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_changed_manifest_triggers_install() {
        let tmp = TempDir::new().unwrap();
        let project = tmp.path().join("proj");
        std::fs::create_dir_all(&project).unwrap();
        let manifest_path = project.join("pantry.json");
        std::fs::write(&manifest_path, r#"{"name":"p"}"#).unwrap();

        let envs = tmp.path().join("envs");
        let installs = AtomicUsize::new(0);

        let cache = EnvCache::new();
        let hook = ActivationHook::new(
            &cache,
            HookConfig {
                environments_root: envs.clone(),
                ..Default::default()
            },
        );

        let content = std::fs::read(&manifest_path).unwrap();
        let expected_hash = ActivationHook::env_hash(&manifest_path, &content);

        let activation = hook
            .activate(&project, &mut |path, hash| {
                installs.fetch_add(1, Ordering::SeqCst);
                assert_eq!(hash, &expected_hash);
                seed_environment(&envs, hash, path);
                Ok(())
            })
            .unwrap();

        assert_eq!(installs.load(Ordering::SeqCst), 1);
        assert!(matches!(activation, Activation::Activate(_)));
    }

    #[test]
    fn test_content_change_changes_hash() {
        let tmp = TempDir::new().unwrap();
        let manifest_path = tmp.path().join("pantry.json");

        let h1 = ActivationHook::env_hash(&manifest_path, br#"{"name":"p"}"#);
        let h2 = ActivationHook::env_hash(&manifest_path, br#"{"name":"q"}"#);
        assert_ne!(h1, h2);
    }

    #[test]
    fn test_no_cache_bypasses_env_cache() {
        let tmp = TempDir::new().unwrap();
        let project = tmp.path().join("proj");
        std::fs::create_dir_all(&project).unwrap();
        let manifest_path = project.join("pantry.json");
        std::fs::write(&manifest_path, r#"{"name":"p"}"#).unwrap();

        let envs = tmp.path().join("envs");
        let content = std::fs::read(&manifest_path).unwrap();
        let hash = ActivationHook::env_hash(&manifest_path, &content);
        seed_environment(&envs, &hash, &manifest_path);

        let cache = EnvCache::new();
        let hook = ActivationHook::new(
            &cache,
            HookConfig {
                environments_root: envs,
                no_cache: true,
                ..Default::default()
            },
        );

        hook.activate(&project, &mut |_, _| Ok(())).unwrap();
        assert!(cache.is_empty());
    }
}
