//! Content-addressed artifact store.
//!
//! Artifacts live under `store_root/packages/<hex(fingerprint(name@version))>`,
//! raw or compressed. Metadata is kept in memory behind a reader-writer
//! lock and persisted to `metadata.json` on every mutation. A missing or
//! corrupt file never poisons the cache: the entry is dropped, a warning
//! is logged, and the caller sees a miss.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::cache::flock::FileLock;
use crate::error::PantryError;
use crate::util::{fs as pantry_fs, paths, Fingerprint, Integrity};

/// Eviction policy applied after each `put`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Least recently accessed first (default).
    Lru,
    /// Least frequently used. No frequency counter is recorded yet, so
    /// this falls back to LRU.
    Lfu,
    /// Oldest download first.
    Fifo,
    /// Entries older than `max_age_seconds` first.
    Ttl,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        EvictionPolicy::Lru
    }
}

/// On-disk artifact encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMode {
    None,
    Gzip,
    Zstd,
}

impl Default for CompressionMode {
    fn default() -> Self {
        CompressionMode::None
    }
}

/// Store configuration.
#[derive(Debug, Clone)]
pub struct ArtifactCacheConfig {
    /// Store root; `packages/` and `metadata.json` live beneath it.
    pub root: PathBuf,

    /// Size budget in bytes; 0 disables eviction.
    pub max_size_bytes: u64,

    /// Age bound for the TTL policy and `prune`.
    pub max_age_seconds: Option<u64>,

    /// Eviction policy.
    pub policy: EvictionPolicy,

    /// On-disk encoding for newly written artifacts.
    pub compression: CompressionMode,

    /// Gate access with the cross-process `.lock` file.
    pub shared: bool,

    /// How long to wait for the cross-process lock.
    pub lock_timeout: Duration,
}

impl Default for ArtifactCacheConfig {
    fn default() -> Self {
        ArtifactCacheConfig {
            root: paths::cache_root(),
            max_size_bytes: 0,
            max_age_seconds: None,
            policy: EvictionPolicy::default(),
            compression: CompressionMode::default(),
            shared: false,
            lock_timeout: Duration::from_secs(5),
        }
    }
}

/// Metadata for one stored artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    /// Package name
    pub name: String,

    /// Package version
    pub version: String,

    /// URL the artifact was fetched from
    pub url: String,

    /// SHA-256 over the artifact bytes (before compression)
    pub checksum: Integrity,

    /// SHA-256 over the bytes actually on disk
    pub stored_checksum: Integrity,

    /// Unix seconds of the download
    pub downloaded_at: u64,

    /// Unix seconds of the last `get`/`read`
    pub last_accessed: u64,

    /// Bytes on disk
    pub size: u64,

    /// Bytes before compression
    pub uncompressed_size: u64,

    /// Absolute path in the store
    pub path: PathBuf,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedState {
    entries: HashMap<String, ArtifactEntry>,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, ArtifactEntry>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Aggregate statistics for `pantry cache stats`.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub packages: usize,
    pub bytes: u64,
    pub uncompressed_bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub evictions: u64,
    pub oldest_download: Option<u64>,
    pub newest_download: Option<u64>,
    pub compression_ratio: f64,
}

/// The content-addressed artifact cache.
pub struct ArtifactCache {
    config: ArtifactCacheConfig,
    state: RwLock<CacheState>,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl ArtifactCache {
    /// Open a store, loading persisted metadata and dropping entries
    /// whose files are gone.
    pub fn open(config: ArtifactCacheConfig) -> Result<Self, PantryError> {
        pantry_fs::ensure_dir(&config.root.join("packages")).map_err(PantryError::Other)?;

        let mut entries = HashMap::new();
        let metadata_path = config.root.join("metadata.json");
        if metadata_path.exists() {
            match std::fs::read_to_string(&metadata_path)
                .ok()
                .and_then(|s| serde_json::from_str::<PersistedState>(&s).ok())
            {
                Some(persisted) => {
                    for (key, entry) in persisted.entries {
                        if entry.path.is_file() {
                            entries.insert(key, entry);
                        } else {
                            tracing::warn!(
                                "dropping cache entry `{}`: file missing from store",
                                key
                            );
                        }
                    }
                }
                None => {
                    tracing::warn!(
                        "cache metadata at {} is unreadable; starting empty",
                        metadata_path.display()
                    );
                }
            }
        }

        Ok(ArtifactCache {
            config,
            state: RwLock::new(CacheState {
                entries,
                ..Default::default()
            }),
        })
    }

    /// The store configuration.
    pub fn config(&self) -> &ArtifactCacheConfig {
        &self.config
    }

    fn key(name: &str, version: &str) -> String {
        format!("{name}@{version}")
    }

    fn store_path(&self, key: &str) -> PathBuf {
        self.config
            .root
            .join("packages")
            .join(Fingerprint::of_str(key).to_hex())
    }

    fn lock_path(&self) -> PathBuf {
        self.config.root.join(".lock")
    }

    fn read_guard(&self) -> Result<Option<FileLock>, PantryError> {
        if self.config.shared {
            Ok(Some(FileLock::shared(
                &self.lock_path(),
                self.config.lock_timeout,
            )?))
        } else {
            Ok(None)
        }
    }

    fn write_guard(&self) -> Result<Option<FileLock>, PantryError> {
        if self.config.shared {
            Ok(Some(FileLock::exclusive(
                &self.lock_path(),
                self.config.lock_timeout,
            )?))
        } else {
            Ok(None)
        }
    }

    fn persist(&self, entries: &HashMap<String, ArtifactEntry>) -> Result<(), PantryError> {
        let persisted = PersistedState {
            entries: entries.clone(),
        };
        let json = serde_json::to_string_pretty(&persisted).map_err(|e| {
            PantryError::CacheCorrupt {
                reason: e.to_string(),
            }
        })?;
        pantry_fs::atomic_write(&self.config.root.join("metadata.json"), json.as_bytes())
            .map_err(PantryError::Other)
    }

    /// Whether the file behind an entry is present and unmodified.
    fn entry_is_sound(entry: &ArtifactEntry) -> bool {
        match Integrity::compute_file(&entry.path) {
            Ok(actual) => actual == entry.stored_checksum,
            Err(_) => false,
        }
    }

    /// Drop an entry and its file; caller holds the write lock.
    fn evict_locked(state: &mut CacheState, key: &str) {
        if let Some(entry) = state.entries.remove(key) {
            let _ = std::fs::remove_file(&entry.path);
            state.evictions += 1;
        }
    }

    /// Check presence. Detects on-disk corruption and self-heals by
    /// dropping the bad entry.
    pub fn has(&self, name: &str, version: &str) -> Result<bool, PantryError> {
        let _guard = self.read_guard()?;
        let key = Self::key(name, version);

        let sound = {
            let state = self.state.read().unwrap();
            match state.entries.get(&key) {
                Some(entry) => Some(Self::entry_is_sound(entry)),
                None => None,
            }
        };

        match sound {
            Some(true) => Ok(true),
            Some(false) => {
                tracing::warn!("cache entry `{}` failed verification; removing", key);
                let mut state = self.state.write().unwrap();
                Self::evict_locked(&mut state, &key);
                self.persist(&state.entries)?;
                Ok(false)
            }
            None => Ok(false),
        }
    }

    /// Fetch the metadata record, updating `last_accessed`.
    pub fn get(&self, name: &str, version: &str) -> Result<Option<ArtifactEntry>, PantryError> {
        let _guard = self.read_guard()?;
        let key = Self::key(name, version);

        let mut state = self.state.write().unwrap();
        let Some(entry) = state.entries.get(&key) else {
            state.misses += 1;
            return Ok(None);
        };

        if !Self::entry_is_sound(entry) {
            tracing::warn!("cache entry `{}` failed verification; removing", key);
            Self::evict_locked(&mut state, &key);
            state.misses += 1;
            self.persist(&state.entries)?;
            return Ok(None);
        }

        // last-accessed moves in memory only; it reaches disk with the
        // next mutation, keeping the read path free of metadata writes
        let entry = {
            let entry = state.entries.get_mut(&key).expect("checked above");
            entry.last_accessed = now_secs();
            entry.clone()
        };
        state.hits += 1;
        Ok(Some(entry))
    }

    /// Store artifact bytes, verifying them against `checksum` first.
    /// Replaces any prior entry for the same package.
    pub fn put(
        &self,
        name: &str,
        version: &str,
        url: &str,
        checksum: &Integrity,
        bytes: &[u8],
    ) -> Result<ArtifactEntry, PantryError> {
        let actual = Integrity::compute(bytes);
        if &actual != checksum {
            return Err(PantryError::IntegrityMismatch {
                name: name.to_string(),
                version: version.to_string(),
                expected: checksum.to_hex(),
                got: actual.to_hex(),
            });
        }

        let _guard = self.write_guard()?;
        let key = Self::key(name, version);
        let path = self.store_path(&key);

        let stored = match self.config.compression {
            CompressionMode::None => bytes.to_vec(),
            CompressionMode::Gzip => {
                let mut encoder =
                    flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
                encoder
                    .write_all(bytes)
                    .and_then(|_| encoder.finish())
                    .map_err(|e| PantryError::CacheCorrupt {
                        reason: format!("gzip failed: {e}"),
                    })?
            }
            CompressionMode::Zstd => {
                zstd::encode_all(bytes, 0).map_err(|e| PantryError::CacheCorrupt {
                    reason: format!("zstd failed: {e}"),
                })?
            }
        };

        pantry_fs::atomic_write(&path, &stored).map_err(|e| map_disk_error(e, &path))?;

        let entry = ArtifactEntry {
            name: name.to_string(),
            version: version.to_string(),
            url: url.to_string(),
            checksum: *checksum,
            stored_checksum: Integrity::compute(&stored),
            downloaded_at: now_secs(),
            last_accessed: now_secs(),
            size: stored.len() as u64,
            uncompressed_size: bytes.len() as u64,
            path,
        };

        let mut state = self.state.write().unwrap();
        if let Some(old) = state.entries.insert(key, entry.clone()) {
            if old.path != entry.path {
                let _ = std::fs::remove_file(&old.path);
            }
        }
        self.evict_over_budget(&mut state);
        self.persist(&state.entries)?;

        Ok(entry)
    }

    /// Read artifact bytes back, decompressed.
    pub fn read(&self, name: &str, version: &str) -> Result<Option<Vec<u8>>, PantryError> {
        let Some(entry) = self.get(name, version)? else {
            return Ok(None);
        };

        let _guard = self.read_guard()?;
        let stored = std::fs::read(&entry.path).map_err(|e| PantryError::CacheCorrupt {
            reason: format!("{}: {e}", entry.path.display()),
        })?;

        let bytes = match self.config.compression {
            CompressionMode::None => stored,
            CompressionMode::Gzip => {
                let mut decoder = flate2::read::GzDecoder::new(stored.as_slice());
                let mut out = Vec::with_capacity(entry.uncompressed_size as usize);
                decoder
                    .read_to_end(&mut out)
                    .map_err(|e| PantryError::CacheCorrupt {
                        reason: format!("gunzip failed: {e}"),
                    })?;
                out
            }
            CompressionMode::Zstd => zstd::decode_all(stored.as_slice()).map_err(|e| {
                PantryError::CacheCorrupt {
                    reason: format!("zstd decode failed: {e}"),
                }
            })?,
        };

        Ok(Some(bytes))
    }

    /// Remove one entry.
    pub fn remove(&self, name: &str, version: &str) -> Result<bool, PantryError> {
        let _guard = self.write_guard()?;
        let key = Self::key(name, version);

        let mut state = self.state.write().unwrap();
        let removed = state.entries.remove(&key);
        if let Some(entry) = &removed {
            let _ = std::fs::remove_file(&entry.path);
        }
        self.persist(&state.entries)?;
        Ok(removed.is_some())
    }

    /// Remove entries older than `max_age_seconds`. Returns the count.
    pub fn prune(&self) -> Result<usize, PantryError> {
        let Some(max_age) = self.config.max_age_seconds else {
            return Ok(0);
        };

        let _guard = self.write_guard()?;
        let cutoff = now_secs().saturating_sub(max_age);

        let mut state = self.state.write().unwrap();
        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, e)| e.downloaded_at < cutoff)
            .map(|(k, _)| k.clone())
            .collect();

        for key in &expired {
            Self::evict_locked(&mut state, key);
        }
        self.persist(&state.entries)?;
        Ok(expired.len())
    }

    /// Remove everything.
    pub fn clean(&self) -> Result<usize, PantryError> {
        let _guard = self.write_guard()?;

        let mut state = self.state.write().unwrap();
        let keys: Vec<String> = state.entries.keys().cloned().collect();
        let count = keys.len();
        for key in &keys {
            Self::evict_locked(&mut state, key);
        }
        self.persist(&state.entries)?;
        Ok(count)
    }

    /// Aggregate statistics.
    pub fn stats(&self) -> CacheStats {
        let state = self.state.read().unwrap();

        let bytes: u64 = state.entries.values().map(|e| e.size).sum();
        let uncompressed: u64 = state.entries.values().map(|e| e.uncompressed_size).sum();
        let lookups = state.hits + state.misses;

        CacheStats {
            packages: state.entries.len(),
            bytes,
            uncompressed_bytes: uncompressed,
            hits: state.hits,
            misses: state.misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                state.hits as f64 / lookups as f64
            },
            evictions: state.evictions,
            oldest_download: state.entries.values().map(|e| e.downloaded_at).min(),
            newest_download: state.entries.values().map(|e| e.downloaded_at).max(),
            compression_ratio: if bytes == 0 {
                1.0
            } else {
                uncompressed as f64 / bytes as f64
            },
        }
    }

    /// Evict until the store fits the budget. Caller holds the state lock.
    fn evict_over_budget(&self, state: &mut CacheState) {
        if self.config.max_size_bytes == 0 {
            return;
        }

        // TTL policy removes expired entries first, then falls through
        if self.config.policy == EvictionPolicy::Ttl {
            if let Some(max_age) = self.config.max_age_seconds {
                let cutoff = now_secs().saturating_sub(max_age);
                let expired: Vec<String> = state
                    .entries
                    .iter()
                    .filter(|(_, e)| e.downloaded_at < cutoff)
                    .map(|(k, _)| k.clone())
                    .collect();
                for key in &expired {
                    Self::evict_locked(state, key);
                }
            }
        }

        loop {
            let total: u64 = state.entries.values().map(|e| e.size).sum();
            if total <= self.config.max_size_bytes || state.entries.is_empty() {
                break;
            }

            let victim = match self.config.policy {
                // LFU has no frequency data yet; both select by recency
                EvictionPolicy::Lru | EvictionPolicy::Lfu | EvictionPolicy::Ttl => state
                    .entries
                    .iter()
                    .min_by_key(|(_, e)| e.last_accessed)
                    .map(|(k, _)| k.clone()),
                EvictionPolicy::Fifo => state
                    .entries
                    .iter()
                    .min_by_key(|(_, e)| e.downloaded_at)
                    .map(|(k, _)| k.clone()),
            };

            match victim {
                Some(key) => {
                    tracing::debug!("evicting `{}` to satisfy size budget", key);
                    Self::evict_locked(state, &key);
                }
                None => break,
            }
        }
    }
}

fn map_disk_error(err: anyhow::Error, path: &Path) -> PantryError {
    let message = err.to_string();
    if message.contains("No space left") {
        PantryError::DiskFull {
            path: path.display().to_string(),
        }
    } else if message.contains("Permission denied") {
        PantryError::Permission {
            path: path.display().to_string(),
        }
    } else {
        PantryError::Other(err)
    }
}

/// Process-global shared cache handle.
static GLOBAL_CACHE: Mutex<Option<Arc<ArtifactCache>>> = Mutex::new(None);

/// Initialize the process-global cache with an explicit configuration.
pub fn init_global(config: ArtifactCacheConfig) -> Result<Arc<ArtifactCache>, PantryError> {
    let mut slot = GLOBAL_CACHE.lock().unwrap();
    let cache = Arc::new(ArtifactCache::open(config)?);
    *slot = Some(Arc::clone(&cache));
    Ok(cache)
}

/// The process-global cache, lazily initialized against the user-wide
/// store with cross-process locking enabled.
pub fn global() -> Result<Arc<ArtifactCache>, PantryError> {
    let mut slot = GLOBAL_CACHE.lock().unwrap();
    if let Some(cache) = slot.as_ref() {
        return Ok(Arc::clone(cache));
    }

    let cache = Arc::new(ArtifactCache::open(ArtifactCacheConfig {
        shared: true,
        ..Default::default()
    })?);
    *slot = Some(Arc::clone(&cache));
    Ok(cache)
}

/// Drop the process-global handle.
pub fn teardown_global() {
    let mut slot = GLOBAL_CACHE.lock().unwrap();
    *slot = None;
}
