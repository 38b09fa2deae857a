//! 16-byte fingerprints used as cache keys.
//!
//! Short inputs (package keys like `node@20.1.0`) go through xxh3-64 and
//! are padded to 16 bytes; anything larger goes through MD5, which already
//! produces 16 bytes. Callers only ever see the 16-byte identifier.

use std::fmt;

use md5::{Digest, Md5};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use xxhash_rust::xxh3::xxh3_64;

/// Inputs at or above this length are hashed with MD5.
const SMALL_INPUT_MAX: usize = 32;

/// A 16-byte content fingerprint.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 16]);

impl Fingerprint {
    /// Fingerprint a byte slice.
    pub fn of_bytes(data: &[u8]) -> Self {
        if data.len() < SMALL_INPUT_MAX {
            let mut out = [0u8; 16];
            out[..8].copy_from_slice(&xxh3_64(data).to_le_bytes());
            Fingerprint(out)
        } else {
            let digest = Md5::digest(data);
            let mut out = [0u8; 16];
            out.copy_from_slice(&digest);
            Fingerprint(out)
        }
    }

    /// Fingerprint a string.
    pub fn of_str(s: &str) -> Self {
        Self::of_bytes(s.as_bytes())
    }

    /// Fingerprint the concatenation of two byte slices.
    ///
    /// Used for environment hashes: `fingerprint(path ∥ content)` without
    /// allocating a joined buffer.
    pub fn of_parts(a: &[u8], b: &[u8]) -> Self {
        if a.len() + b.len() < SMALL_INPUT_MAX {
            let mut buf = [0u8; SMALL_INPUT_MAX];
            buf[..a.len()].copy_from_slice(a);
            buf[a.len()..a.len() + b.len()].copy_from_slice(b);
            Self::of_bytes(&buf[..a.len() + b.len()])
        } else {
            let mut hasher = Md5::new();
            hasher.update(a);
            hasher.update(b);
            let mut out = [0u8; 16];
            out.copy_from_slice(&hasher.finalize());
            Fingerprint(out)
        }
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Reconstruct from raw bytes.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Fingerprint(bytes)
    }

    /// Parse the hex rendering produced by [`Fingerprint::to_hex`].
    pub fn from_hex(s: &str) -> Option<Self> {
        let decoded = hex::decode(s).ok()?;
        let bytes: [u8; 16] = decoded.try_into().ok()?;
        Some(Fingerprint(bytes))
    }

    /// Lowercase hex rendering (32 chars).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Fingerprint {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_hex().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Fingerprint::from_hex(&s)
            .ok_or_else(|| serde::de::Error::custom("expected 32 hex characters"))
    }
}
