//! Test utilities and mocks for pantry unit tests.
//!
//! Provides an in-memory registry that records every request, so tests
//! can assert on network behavior (e.g. offline mode performs none).

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use flate2::write::GzEncoder;
use flate2::Compression;
use semver::Version;

use crate::error::PantryError;
use crate::registry::{PackageMetadata, RegistryClient, VersionMetadata};
use crate::util::process::CancelFlag;
use crate::util::Integrity;

/// Build a gzipped tarball with the given `(path, contents, executable)`
/// entries, the shape real package artifacts have.
pub fn make_tarball(files: &[(&str, &[u8], bool)]) -> Vec<u8> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for (path, contents, executable) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(if *executable { 0o755 } else { 0o644 });
        header.set_cksum();
        builder.append_data(&mut header, path, *contents).unwrap();
    }

    builder
        .into_inner()
        .and_then(GzEncoder::finish)
        .expect("in-memory tarball")
}

/// An in-memory registry with request accounting.
#[derive(Default)]
pub struct MockRegistry {
    versions: RwLock<HashMap<String, Vec<VersionMetadata>>>,
    artifacts: RwLock<HashMap<String, Vec<u8>>>,
    metadata_requests: AtomicUsize,
    fetch_requests: AtomicUsize,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a version with default binaries (`bin/<name>`).
    pub fn publish(&self, name: &str, version: &str, deps: &[(&str, &str)]) -> Integrity {
        self.publish_full(name, version, deps, None, &[&format!("bin/{name}")])
    }

    /// Publish with an explicit publication time (unix seconds).
    pub fn publish_at(
        &self,
        name: &str,
        version: &str,
        deps: &[(&str, &str)],
        published_at: u64,
    ) -> Integrity {
        self.publish_full(
            name,
            version,
            deps,
            Some(published_at),
            &[&format!("bin/{name}")],
        )
    }

    /// Publish with explicit binary entries.
    pub fn publish_with_binaries(
        &self,
        name: &str,
        version: &str,
        deps: &[(&str, &str)],
        binaries: &[&str],
    ) -> Integrity {
        self.publish_full(name, version, deps, None, binaries)
    }

    fn publish_full(
        &self,
        name: &str,
        version: &str,
        deps: &[(&str, &str)],
        published_at: Option<u64>,
        binaries: &[&str],
    ) -> Integrity {
        let script = format!("#!/bin/sh\necho {name} {version}\n");
        let files: Vec<(&str, &[u8], bool)> = binaries
            .iter()
            .map(|b| (*b, script.as_bytes(), true))
            .collect();
        let tarball = make_tarball(&files);
        let integrity = Integrity::compute(&tarball);

        let url = format!("mock://artifacts/{name}/{version}.tgz");
        self.artifacts.write().unwrap().insert(url.clone(), tarball);

        let parsed: Version = version.parse().expect("mock version is semver");
        let metadata = VersionMetadata {
            version: parsed,
            url: Some(url),
            integrity: Some(integrity),
            published_at,
            dependencies: deps
                .iter()
                .map(|(n, c)| (n.to_string(), c.to_string()))
                .collect(),
            binaries: binaries.iter().map(|b| b.to_string()).collect(),
            env: BTreeMap::new(),
        };

        self.versions
            .write()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .push(metadata);

        integrity
    }

    /// Replace the artifact bytes for a version without touching its
    /// advertised integrity, to simulate a tampering registry.
    pub fn corrupt_artifact(&self, name: &str, version: &str) {
        let url = format!("mock://artifacts/{name}/{version}.tgz");
        self.artifacts
            .write()
            .unwrap()
            .insert(url, b"corrupted bytes that hash differently".to_vec());
    }

    /// Number of metadata lookups served.
    pub fn metadata_requests(&self) -> usize {
        self.metadata_requests.load(Ordering::SeqCst)
    }

    /// Number of artifact fetches served.
    pub fn fetch_requests(&self) -> usize {
        self.fetch_requests.load(Ordering::SeqCst)
    }

    /// The artifact URL published for a version.
    pub fn url_of(&self, name: &str, version: &str) -> String {
        format!("mock://artifacts/{name}/{version}.tgz")
    }
}

impl RegistryClient for MockRegistry {
    fn metadata(&self, name: &str) -> Result<PackageMetadata, PantryError> {
        self.metadata_requests.fetch_add(1, Ordering::SeqCst);

        let versions = self.versions.read().unwrap();
        match versions.get(name) {
            Some(list) => Ok(PackageMetadata {
                name: name.to_string(),
                versions: list.clone(),
            }
            .normalize()),
            None => Err(PantryError::RegistryFetchFailed {
                name: name.to_string(),
                cause: "404 not found".to_string(),
            }),
        }
    }

    fn fetch(&self, url: &str, cancel: &CancelFlag) -> Result<Vec<u8>, PantryError> {
        if cancel.is_cancelled() {
            return Err(PantryError::Cancelled);
        }
        self.fetch_requests.fetch_add(1, Ordering::SeqCst);

        let artifacts = self.artifacts.read().unwrap();
        artifacts
            .get(url)
            .cloned()
            .ok_or_else(|| PantryError::NetworkFatal {
                cause: format!("mock registry has no artifact at {url}"),
            })
    }
}

/// A registry whose first N fetches fail with a transient error, for
/// retry tests.
pub struct FlakyRegistry {
    inner: MockRegistry,
    failures_remaining: AtomicUsize,
    attempts: AtomicUsize,
}

impl FlakyRegistry {
    pub fn new(failures: usize) -> Self {
        FlakyRegistry {
            inner: MockRegistry::new(),
            failures_remaining: AtomicUsize::new(failures),
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &MockRegistry {
        &self.inner
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl RegistryClient for FlakyRegistry {
    fn metadata(&self, name: &str) -> Result<PackageMetadata, PantryError> {
        self.inner.metadata(name)
    }

    fn fetch(&self, url: &str, cancel: &CancelFlag) -> Result<Vec<u8>, PantryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining
                .store(remaining - 1, Ordering::SeqCst);
            return Err(PantryError::NetworkTransient {
                cause: "connection reset".to_string(),
            });
        }

        self.inner.fetch(url, cancel)
    }
}
