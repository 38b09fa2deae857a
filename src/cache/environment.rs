//! Two-tier environment cache.
//!
//! Tier 1 is a ring of eight 64-byte-aligned slots scanned without
//! blocking: readers use `try_read` and simply skip a contended slot, so
//! the fast path never waits on a lock. Tier 2 is the authoritative map
//! behind a reader-writer lock. The ring is an eventually-consistent hint;
//! every entry coming out of either tier is revalidated (TTL + manifest
//! mtime) before it is returned.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::util::Fingerprint;

const RING_SLOTS: usize = 8;

/// Default entry TTL; `PANTRY_CACHE_TTL` overrides.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// One cached activation payload.
#[derive(Debug)]
pub struct EnvCacheEntry {
    /// Environment hash (manifest path ∥ normalized content)
    pub hash: Fingerprint,

    /// The manifest file this entry depends on
    pub dep_file: PathBuf,

    /// Manifest mtime at creation; any change invalidates the entry
    pub dep_mtime: SystemTime,

    /// Value for `PATH`
    pub path_value: String,

    /// Other environment variables
    pub env_vars: BTreeMap<String, String>,

    /// Unix seconds at creation
    pub created_at: u64,

    /// Unix seconds of the last successful validation
    pub last_validated: AtomicU64,

    /// Time-to-live
    pub ttl: Duration,
}

impl EnvCacheEntry {
    /// Build an entry stamped now, reading the manifest mtime.
    pub fn new(
        hash: Fingerprint,
        dep_file: PathBuf,
        path_value: String,
        env_vars: BTreeMap<String, String>,
        ttl: Duration,
    ) -> std::io::Result<Self> {
        let dep_mtime = std::fs::metadata(&dep_file)?.modified()?;
        let now = now_secs();
        Ok(EnvCacheEntry {
            hash,
            dep_file,
            dep_mtime,
            path_value,
            env_vars,
            created_at: now,
            last_validated: AtomicU64::new(now),
            ttl,
        })
    }

    /// Whether the entry's age is within its TTL.
    pub fn is_within_ttl(&self, now: u64) -> bool {
        now.saturating_sub(self.created_at) <= self.ttl.as_secs()
    }

    /// An entry is valid iff it is within TTL and the manifest mtime is
    /// unchanged.
    pub fn is_valid(&self, now: u64) -> bool {
        if !self.is_within_ttl(now) {
            return false;
        }
        match std::fs::metadata(&self.dep_file).and_then(|m| m.modified()) {
            Ok(mtime) => mtime == self.dep_mtime,
            Err(_) => false,
        }
    }

    fn touch(&self, now: u64) {
        self.last_validated.store(now, Ordering::Relaxed);
    }
}

/// A snapshot returned to callers; owned copies, no lock retained.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvSnapshot {
    pub path_value: String,
    pub env_vars: BTreeMap<String, String>,
}

impl From<&EnvCacheEntry> for EnvSnapshot {
    fn from(entry: &EnvCacheEntry) -> Self {
        EnvSnapshot {
            path_value: entry.path_value.clone(),
            env_vars: entry.env_vars.clone(),
        }
    }
}

#[repr(align(64))]
#[derive(Default)]
struct Slot {
    entry: RwLock<Option<Arc<EnvCacheEntry>>>,
}

/// The two-tier environment cache.
pub struct EnvCache {
    ring: [Slot; RING_SLOTS],
    /// Monotonic publish cursor for round-robin slot assignment
    cursor: AtomicUsize,
    /// Authoritative storage
    map: RwLock<HashMap<Fingerprint, Arc<EnvCacheEntry>>>,
}

impl Default for EnvCache {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvCache {
    pub fn new() -> Self {
        EnvCache {
            ring: Default::default(),
            cursor: AtomicUsize::new(0),
            map: RwLock::new(HashMap::new()),
        }
    }

    /// Look up an activation payload, revalidating TTL + manifest mtime
    /// with a `stat` per candidate entry.
    pub fn get(&self, hash: &Fingerprint) -> Option<EnvSnapshot> {
        let now = now_secs();
        self.lookup(hash, now, |entry| entry.is_valid(now))
    }

    /// Look up against an mtime the caller already observed, so a hit
    /// costs no filesystem access at all.
    pub fn get_fresh(&self, hash: &Fingerprint, dep_mtime: SystemTime) -> Option<EnvSnapshot> {
        let now = now_secs();
        self.lookup(hash, now, |entry| {
            entry.is_within_ttl(now) && entry.dep_mtime == dep_mtime
        })
    }

    /// Two-tier lookup. Order: ring scan, validate; then map under
    /// shared lock, validate, promote to ring. Invalid entries are
    /// removed from both tiers.
    fn lookup(
        &self,
        hash: &Fingerprint,
        now: u64,
        valid: impl Fn(&EnvCacheEntry) -> bool,
    ) -> Option<EnvSnapshot> {
        // Tier 1: non-blocking ring scan. A contended or stale slot is
        // skipped; the map below is authoritative.
        for slot in &self.ring {
            let Ok(guard) = slot.entry.try_read() else {
                continue;
            };
            let Some(entry) = guard.as_ref() else {
                continue;
            };
            if entry.hash != *hash {
                continue;
            }

            if valid(entry.as_ref()) {
                entry.touch(now);
                return Some(EnvSnapshot::from(entry.as_ref()));
            }

            drop(guard);
            self.invalidate(hash);
            return None;
        }

        // Tier 2: authoritative map
        let found = {
            let map = self.map.read().unwrap();
            map.get(hash).cloned()
        };

        let entry = found?;
        if !valid(entry.as_ref()) {
            self.invalidate(hash);
            return None;
        }

        entry.touch(now);
        self.publish_to_ring(Arc::clone(&entry));
        Some(EnvSnapshot::from(entry.as_ref()))
    }

    /// Insert or replace an entry, making it visible in both tiers.
    pub fn insert(&self, entry: EnvCacheEntry) {
        let entry = Arc::new(entry);
        {
            let mut map = self.map.write().unwrap();
            map.insert(entry.hash, Arc::clone(&entry));
        }
        self.publish_to_ring(entry);
    }

    /// Remove an entry from both tiers.
    pub fn invalidate(&self, hash: &Fingerprint) {
        {
            let mut map = self.map.write().unwrap();
            map.remove(hash);
        }
        for slot in &self.ring {
            let mut guard = slot.entry.write().unwrap();
            if guard.as_ref().is_some_and(|e| e.hash == *hash) {
                *guard = None;
            }
        }
    }

    /// Drop expired entries from the map and clear their ring slots.
    /// Safe under concurrent readers.
    pub fn cleanup(&self) -> usize {
        let now = now_secs();

        let expired: Vec<Fingerprint> = {
            let map = self.map.read().unwrap();
            map.values()
                .filter(|e| !e.is_valid(now))
                .map(|e| e.hash)
                .collect()
        };

        for hash in &expired {
            self.invalidate(hash);
        }
        expired.len()
    }

    /// Number of entries in the authoritative map.
    pub fn len(&self) -> usize {
        self.map.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn publish_to_ring(&self, entry: Arc<EnvCacheEntry>) {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % RING_SLOTS;
        let mut guard = self.ring[index].entry.write().unwrap();
        *guard = Some(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry_for(
        tmp: &TempDir,
        name: &str,
        ttl: Duration,
    ) -> (Fingerprint, EnvCacheEntry) {
        let dep_file = tmp.path().join(format!("{name}.json"));
        std::fs::write(&dep_file, format!("{{\"name\":\"{name}\"}}")).unwrap();

        let hash = Fingerprint::of_str(name);
        let entry = EnvCacheEntry::new(
            hash,
            dep_file,
            format!("/envs/{name}/bin:/usr/bin"),
            BTreeMap::from([(String::from("PANTRY_ENV"), name.to_string())]),
            ttl,
        )
        .unwrap();
        (hash, entry)
    }

    #[test]
    fn test_insert_then_get() {
        let tmp = TempDir::new().unwrap();
        let cache = EnvCache::new();
        let (hash, entry) = entry_for(&tmp, "proj", DEFAULT_TTL);

        cache.insert(entry);

        let snapshot = cache.get(&hash).unwrap();
        assert!(snapshot.path_value.starts_with("/envs/proj/bin"));
        assert_eq!(snapshot.env_vars["PANTRY_ENV"], "proj");
    }

    #[test]
    fn test_miss_returns_none() {
        let cache = EnvCache::new();
        assert!(cache.get(&Fingerprint::of_str("nope")).is_none());
    }

    #[test]
    fn test_mtime_change_invalidates() {
        let tmp = TempDir::new().unwrap();
        let cache = EnvCache::new();
        let (hash, entry) = entry_for(&tmp, "proj", DEFAULT_TTL);
        let dep_file = entry.dep_file.clone();

        cache.insert(entry);
        assert!(cache.get(&hash).is_some());

        // Rewrite the manifest; mtime moves forward
        std::thread::sleep(Duration::from_millis(20));
        std::fs::write(&dep_file, r#"{"name":"changed"}"#).unwrap();

        assert!(cache.get(&hash).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_expired_ttl_invalidates() {
        let tmp = TempDir::new().unwrap();
        let cache = EnvCache::new();
        let (hash, mut entry) = entry_for(&tmp, "proj", Duration::from_secs(10));
        entry.created_at = now_secs() - 3600;

        cache.insert(entry);
        assert!(cache.get(&hash).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_deleted_manifest_invalidates() {
        let tmp = TempDir::new().unwrap();
        let cache = EnvCache::new();
        let (hash, entry) = entry_for(&tmp, "proj", DEFAULT_TTL);
        let dep_file = entry.dep_file.clone();

        cache.insert(entry);
        std::fs::remove_file(&dep_file).unwrap();
        assert!(cache.get(&hash).is_none());
    }

    #[test]
    fn test_many_entries_overflow_ring_but_stay_in_map() {
        let tmp = TempDir::new().unwrap();
        let cache = EnvCache::new();

        let mut hashes = Vec::new();
        for i in 0..20 {
            let (hash, entry) = entry_for(&tmp, &format!("proj{i}"), DEFAULT_TTL);
            cache.insert(entry);
            hashes.push(hash);
        }

        // All 20 remain reachable even though the ring holds 8
        for hash in &hashes {
            assert!(cache.get(hash).is_some());
        }
        assert_eq!(cache.len(), 20);
    }

    #[test]
    fn test_get_fresh_validates_against_observed_mtime() {
        let tmp = TempDir::new().unwrap();
        let cache = EnvCache::new();
        let (hash, entry) = entry_for(&tmp, "proj", DEFAULT_TTL);
        let recorded_mtime = entry.dep_mtime;
        let dep_file = entry.dep_file.clone();
        cache.insert(entry);

        assert!(cache.get_fresh(&hash, recorded_mtime).is_some());

        // Deleting the manifest does not affect get_fresh: it trusts the
        // caller's observation and never touches the filesystem
        std::fs::remove_file(&dep_file).unwrap();
        assert!(cache.get_fresh(&hash, recorded_mtime).is_some());

        // A different observed mtime invalidates both tiers
        let later = recorded_mtime + Duration::from_secs(5);
        assert!(cache.get_fresh(&hash, later).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cleanup_removes_only_expired() {
        let tmp = TempDir::new().unwrap();
        let cache = EnvCache::new();

        let (fresh_hash, fresh) = entry_for(&tmp, "fresh", DEFAULT_TTL);
        cache.insert(fresh);

        let (_, mut stale) = entry_for(&tmp, "stale", Duration::from_secs(1));
        stale.created_at = now_secs() - 600;
        cache.insert(stale);

        assert_eq!(cache.cleanup(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&fresh_hash).is_some());
    }

    #[test]
    fn test_invalidate_clears_both_tiers() {
        let tmp = TempDir::new().unwrap();
        let cache = EnvCache::new();
        let (hash, entry) = entry_for(&tmp, "proj", DEFAULT_TTL);

        cache.insert(entry);
        cache.invalidate(&hash);

        assert!(cache.get(&hash).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_concurrent_reads_and_cleanup() {
        use std::sync::Arc as StdArc;

        let tmp = TempDir::new().unwrap();
        let cache = StdArc::new(EnvCache::new());

        let mut hashes = Vec::new();
        for i in 0..8 {
            let (hash, entry) = entry_for(&tmp, &format!("c{i}"), DEFAULT_TTL);
            cache.insert(entry);
            hashes.push(hash);
        }

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cache = StdArc::clone(&cache);
                let hashes = hashes.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        for hash in &hashes {
                            let _ = cache.get(hash);
                        }
                    }
                })
            })
            .collect();

        for _ in 0..20 {
            cache.cleanup();
        }

        for reader in readers {
            reader.join().unwrap();
        }

        assert_eq!(cache.len(), 8);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let tmp = TempDir::new().unwrap();
        let cache = EnvCache::new();
        let (hash, entry) = entry_for(&tmp, "proj", DEFAULT_TTL);
        cache.insert(entry);

        let mut snapshot = cache.get(&hash).unwrap();
        snapshot
            .env_vars
            .insert("MUTATED".to_string(), "yes".to_string());

        // The cached entry is unaffected by mutating the snapshot
        let again = cache.get(&hash).unwrap();
        assert!(!again.env_vars.contains_key("MUTATED"));
    }
}
