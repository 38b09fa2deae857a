//! Caching layers: the content-addressed artifact store and the
//! two-tier environment cache.

pub mod artifact;
pub mod environment;
pub mod flock;

pub use artifact::{
    ArtifactCache, ArtifactCacheConfig, ArtifactEntry, CacheStats, CompressionMode,
    EvictionPolicy,
};
pub use environment::{EnvCache, EnvCacheEntry, EnvSnapshot};
pub use flock::FileLock;
