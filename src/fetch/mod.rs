//! Concurrent artifact download and verification.
//!
//! Each task consults the artifact cache first, downloads on a miss
//! (honoring offline mode and the retry budget), verifies SHA-256 against
//! the expected integrity, and stores the result. Workers share a
//! lock-protected index into the task list; the first fatal error raises
//! the shared cancellation flag and remaining workers drain out.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::cache::{ArtifactCache, ArtifactEntry};
use crate::core::{PackageId, SourceKind};
use crate::error::PantryError;
use crate::registry::RegistryClient;
use crate::resolver::{ResolvedGraph, ResolvedPackage};
use crate::util::process::CancelFlag;
use crate::util::Integrity;

const DEFAULT_RETRIES: usize = 3;
const BACKOFF_BASE: Duration = Duration::from_millis(100);

/// Downloader policy.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Worker count; see [`effective_parallelism`].
    pub parallelism: usize,

    /// Refuse the network; a cache miss is fatal.
    pub offline: bool,

    /// Attempts per artifact for transient failures.
    pub retries: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        FetchOptions {
            parallelism: effective_parallelism(None).expect("default bounds are valid"),
            offline: false,
            retries: DEFAULT_RETRIES,
        }
    }
}

/// Compute the worker count: `min(8, cores × 2)` by default, any override
/// bounded to [2, 64].
pub fn effective_parallelism(override_value: Option<usize>) -> Result<usize, PantryError> {
    match override_value {
        Some(n) if (2..=64).contains(&n) => Ok(n),
        Some(n) => Err(PantryError::ConcurrencyLimitInvalid {
            value: n.to_string(),
        }),
        None => {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4);
            Ok((cores * 2).min(8).clamp(2, 64))
        }
    }
}

/// The download/verify pipeline.
pub struct Downloader<'a> {
    registry: &'a dyn RegistryClient,
    cache: &'a ArtifactCache,
    options: FetchOptions,
    cancel: CancelFlag,
}

impl<'a> Downloader<'a> {
    pub fn new(
        registry: &'a dyn RegistryClient,
        cache: &'a ArtifactCache,
        options: FetchOptions,
    ) -> Self {
        Downloader {
            registry,
            cache,
            options,
            cancel: CancelFlag::new(),
        }
    }

    /// The shared cancellation flag; raise it to stop in-flight work.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Ensure one package's artifact is cached; returns its entry.
    pub fn ensure(&self, package: &ResolvedPackage) -> Result<ArtifactEntry, PantryError> {
        let name = package.name().as_str();
        let version = package.version().to_string();

        if self.cache.has(name, &version)? {
            if let Some(entry) = self.cache.get(name, &version)? {
                tracing::debug!("artifact cache hit for {}@{}", name, version);
                return Ok(entry);
            }
        }

        if self.options.offline {
            return Err(PantryError::OfflineCacheMiss {
                name: name.to_string(),
                version,
            });
        }

        let url = package
            .resolved_url
            .as_deref()
            .ok_or_else(|| PantryError::RegistryFetchFailed {
                name: name.to_string(),
                cause: "no artifact URL".to_string(),
            })?;

        let bytes = self.fetch_with_retry(url)?;

        // Byte-wise integrity check against the registry's hash; when the
        // registry supplied none (github/http sources), the computed hash
        // becomes the integrity of record
        let actual = Integrity::compute(&bytes);
        let expected = match package.integrity {
            Some(expected) => {
                if expected != actual {
                    return Err(PantryError::IntegrityMismatch {
                        name: name.to_string(),
                        version,
                        expected: expected.to_hex(),
                        got: actual.to_hex(),
                    });
                }
                expected
            }
            None => actual,
        };

        self.cache.put(name, &version, url, &expected, &bytes)
    }

    /// Ensure every non-local package in the graph, with bounded
    /// parallelism. Returns entries keyed by package id.
    pub fn ensure_all(
        &self,
        graph: &ResolvedGraph,
    ) -> Result<HashMap<PackageId, ArtifactEntry>, PantryError> {
        let tasks: Vec<PackageId> = graph
            .sorted_ids()
            .into_iter()
            .filter(|id| {
                graph
                    .package(*id)
                    .is_some_and(|p| p.source != SourceKind::Local)
            })
            .collect();

        if tasks.is_empty() {
            return Ok(HashMap::new());
        }

        let next = Mutex::new(0usize);
        let results: Mutex<HashMap<PackageId, ArtifactEntry>> = Mutex::new(HashMap::new());
        let first_error: Mutex<Option<PantryError>> = Mutex::new(None);
        let workers = self.options.parallelism.min(tasks.len());

        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    if self.cancel.is_cancelled() {
                        return;
                    }

                    let index = {
                        let mut guard = next.lock().unwrap();
                        let index = *guard;
                        *guard += 1;
                        index
                    };
                    if index >= tasks.len() {
                        return;
                    }

                    let id = tasks[index];
                    let package = graph.package(id).expect("task ids come from the graph");

                    match self.ensure(package) {
                        Ok(entry) => {
                            results.lock().unwrap().insert(id, entry);
                        }
                        Err(err) => {
                            let mut slot = first_error.lock().unwrap();
                            if slot.is_none() {
                                *slot = Some(err);
                            }
                            drop(slot);
                            self.cancel.cancel();
                            return;
                        }
                    }
                });
            }
        });

        if let Some(err) = first_error.lock().unwrap().take() {
            return Err(err);
        }
        Ok(results.into_inner().unwrap())
    }

    /// Fetch with exponential backoff; 4xx and other fatal errors do not
    /// retry.
    fn fetch_with_retry(&self, url: &str) -> Result<Vec<u8>, PantryError> {
        let mut attempt = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Err(PantryError::Cancelled);
            }

            match self.registry.fetch(url, &self.cancel) {
                Ok(bytes) => return Ok(bytes),
                Err(PantryError::NetworkTransient { cause }) => {
                    attempt += 1;
                    if attempt >= self.options.retries {
                        return Err(PantryError::NetworkTransient { cause });
                    }
                    let backoff = BACKOFF_BASE * 2u32.pow(attempt as u32 - 1);
                    tracing::warn!(
                        "transient failure fetching {} (attempt {}/{}): {}; retrying in {:?}",
                        url,
                        attempt,
                        self.options.retries,
                        cause,
                        backoff
                    );
                    std::thread::sleep(backoff);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ArtifactCacheConfig;
    use crate::core::manifest::parse as parse_manifest;
    use crate::resolver::{ResolveOptions, Resolver};
    use crate::test_support::{FlakyRegistry, MockRegistry};
    use tempfile::TempDir;

    fn cache_in(tmp: &TempDir) -> ArtifactCache {
        ArtifactCache::open(ArtifactCacheConfig {
            root: tmp.path().to_path_buf(),
            ..Default::default()
        })
        .unwrap()
    }

    fn resolve(registry: &dyn RegistryClient, json: &str) -> ResolvedGraph {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("pantry.json");
        std::fs::write(&path, json).unwrap();
        let manifest = parse_manifest(json, &path).unwrap();
        Resolver::new(registry, None, ResolveOptions::default())
            .resolve(&manifest)
            .unwrap()
            .graph
    }

    #[test]
    fn test_parallelism_bounds() {
        assert!(effective_parallelism(None).unwrap() >= 2);
        assert_eq!(effective_parallelism(Some(16)).unwrap(), 16);
        assert!(matches!(
            effective_parallelism(Some(1)),
            Err(PantryError::ConcurrencyLimitInvalid { .. })
        ));
        assert!(matches!(
            effective_parallelism(Some(100)),
            Err(PantryError::ConcurrencyLimitInvalid { .. })
        ));
    }

    #[test]
    fn test_ensure_downloads_and_caches() {
        let tmp = TempDir::new().unwrap();
        let cache = cache_in(&tmp);
        let registry = MockRegistry::new();
        registry.publish("a", "1.0.0", &[]);

        let graph = resolve(&registry, r#"{"name":"p","dependencies":{"a":"=1.0.0"}}"#);
        let downloader = Downloader::new(&registry, &cache, FetchOptions::default());

        let entries = downloader.ensure_all(&graph).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(registry.fetch_requests(), 1);
        assert!(cache.has("a", "1.0.0").unwrap());

        // Second run is served from the cache, no further fetches
        let again = downloader.ensure_all(&graph).unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(registry.fetch_requests(), 1);
    }

    #[test]
    fn test_integrity_mismatch_is_fatal_and_leaves_cache_unchanged() {
        let tmp = TempDir::new().unwrap();
        let cache = cache_in(&tmp);
        let registry = MockRegistry::new();
        registry.publish("a", "1.0.0", &[]);
        registry.corrupt_artifact("a", "1.0.0");

        let graph = resolve(&registry, r#"{"name":"p","dependencies":{"a":"=1.0.0"}}"#);
        let downloader = Downloader::new(&registry, &cache, FetchOptions::default());

        let result = downloader.ensure_all(&graph);
        assert!(matches!(
            result,
            Err(PantryError::IntegrityMismatch { name, .. }) if name == "a"
        ));
        assert!(!cache.has("a", "1.0.0").unwrap());
        assert_eq!(cache.stats().packages, 0);
    }

    #[test]
    fn test_offline_hit_needs_no_network() {
        let tmp = TempDir::new().unwrap();
        let cache = cache_in(&tmp);
        let registry = MockRegistry::new();
        registry.publish("a", "1.0.0", &[]);

        let graph = resolve(&registry, r#"{"name":"p","dependencies":{"a":"=1.0.0"}}"#);

        // Warm the cache online
        Downloader::new(&registry, &cache, FetchOptions::default())
            .ensure_all(&graph)
            .unwrap();
        let fetches_before = registry.fetch_requests();

        // Offline run succeeds purely from the cache
        let offline = Downloader::new(
            &registry,
            &cache,
            FetchOptions {
                offline: true,
                ..Default::default()
            },
        );
        let entries = offline.ensure_all(&graph).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(registry.fetch_requests(), fetches_before);
    }

    #[test]
    fn test_offline_miss_fails_without_network() {
        let tmp = TempDir::new().unwrap();
        let cache = cache_in(&tmp);
        let registry = MockRegistry::new();
        registry.publish("a", "1.0.0", &[]);

        let graph = resolve(&registry, r#"{"name":"p","dependencies":{"a":"=1.0.0"}}"#);
        let downloader = Downloader::new(
            &registry,
            &cache,
            FetchOptions {
                offline: true,
                ..Default::default()
            },
        );

        let result = downloader.ensure_all(&graph);
        assert!(matches!(
            result,
            Err(PantryError::OfflineCacheMiss { name, version })
                if name == "a" && version == "1.0.0"
        ));
        assert_eq!(registry.fetch_requests(), 0);
    }

    #[test]
    fn test_transient_errors_retry_until_success() {
        let tmp = TempDir::new().unwrap();
        let cache = cache_in(&tmp);
        let registry = FlakyRegistry::new(2);
        registry.inner().publish("a", "1.0.0", &[]);

        let graph = resolve(&registry, r#"{"name":"p","dependencies":{"a":"=1.0.0"}}"#);
        let downloader = Downloader::new(&registry, &cache, FetchOptions::default());

        downloader.ensure_all(&graph).unwrap();
        // Two failures plus the success
        assert_eq!(registry.attempts(), 3);
    }

    #[test]
    fn test_retry_budget_exhausted_surfaces_transient_error() {
        let tmp = TempDir::new().unwrap();
        let cache = cache_in(&tmp);
        let registry = FlakyRegistry::new(10);
        registry.inner().publish("a", "1.0.0", &[]);

        let graph = resolve(&registry, r#"{"name":"p","dependencies":{"a":"=1.0.0"}}"#);
        let downloader = Downloader::new(&registry, &cache, FetchOptions::default());

        let result = downloader.ensure_all(&graph);
        assert!(matches!(
            result,
            Err(PantryError::NetworkTransient { .. })
        ));
        assert_eq!(registry.attempts(), DEFAULT_RETRIES);
    }

    #[test]
    fn test_local_packages_are_skipped() {
        let tmp = TempDir::new().unwrap();
        let member = tmp.path().join("packages").join("lib-a");
        std::fs::create_dir_all(&member).unwrap();
        std::fs::write(member.join("pantry.json"), r#"{"name":"lib-a","version":"0.1.0"}"#)
            .unwrap();

        let json = r#"{"name":"p","workspaces":["packages/*"],"dependencies":{"lib-a":"*"}}"#;
        let root = tmp.path().join("pantry.json");
        std::fs::write(&root, json).unwrap();
        let manifest = parse_manifest(json, &root).unwrap();

        let registry = MockRegistry::new();
        let graph = Resolver::new(&registry, None, ResolveOptions::default())
            .resolve(&manifest)
            .unwrap()
            .graph;

        let cache_dir = TempDir::new().unwrap();
        let cache = cache_in(&cache_dir);
        let downloader = Downloader::new(&registry, &cache, FetchOptions::default());

        let entries = downloader.ensure_all(&graph).unwrap();
        assert!(entries.is_empty());
        assert_eq!(registry.fetch_requests(), 0);
    }

    #[test]
    fn test_cancellation_stops_pipeline() {
        let tmp = TempDir::new().unwrap();
        let cache = cache_in(&tmp);
        let registry = MockRegistry::new();
        registry.publish("a", "1.0.0", &[]);

        let graph = resolve(&registry, r#"{"name":"p","dependencies":{"a":"=1.0.0"}}"#);
        let downloader = Downloader::new(&registry, &cache, FetchOptions::default());
        downloader.cancel_flag().cancel();

        let entries = downloader.ensure_all(&graph).unwrap();
        assert!(entries.is_empty());
        assert_eq!(registry.fetch_requests(), 0);
    }
}
