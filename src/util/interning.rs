//! Interned identifiers for the resolver's hot paths.
//!
//! Package names are compared constantly while merging constraints and
//! keying caches, so they are interned once and compared by pointer
//! afterwards. [`Interner`] holds the one lock-and-leak implementation;
//! [`PackageName`] is the string instance, and package identities build
//! their own instance on top of it.

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{LazyLock, RwLock};

/// A leak-based interner: the first `intern` of a value leaks one
/// canonical allocation, and every later call returns the same
/// `&'static` reference.
pub struct Interner<T: 'static> {
    entries: RwLock<HashMap<T, &'static T>>,
}

impl<T: Clone + Eq + Hash> Interner<T> {
    pub fn new() -> Self {
        Interner {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Return the canonical reference for `key`, building the owned
    /// value with `make` only when this is the first sighting. The read
    /// lock serves repeat lookups; the write path re-checks because two
    /// threads can race past the read.
    pub fn intern<Q>(&self, key: &Q, make: impl FnOnce(&Q) -> T) -> &'static T
    where
        T: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        {
            let entries = self.entries.read().unwrap();
            if let Some(&interned) = entries.get(key) {
                return interned;
            }
        }

        let mut entries = self.entries.write().unwrap();
        if let Some(&interned) = entries.get(key) {
            return interned;
        }

        let leaked: &'static T = Box::leak(Box::new(make(key)));
        entries.insert(leaked.clone(), leaked);
        leaked
    }
}

impl<T: Clone + Eq + Hash> Default for Interner<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Global interner for package names
static NAMES: LazyLock<Interner<String>> = LazyLock::new(Interner::new);

/// An interned package name (dotted or scoped identifier).
///
/// Equal names share one allocation, so equality and hashing are
/// pointer operations; ordering stays lexicographic for deterministic
/// output.
#[derive(Clone, Copy)]
pub struct PackageName {
    inner: &'static str,
}

impl PackageName {
    pub fn new(name: impl AsRef<str>) -> Self {
        let interned = NAMES.intern(name.as_ref(), |s| s.to_string());
        PackageName {
            inner: interned.as_str(),
        }
    }

    #[inline]
    pub fn as_str(&self) -> &'static str {
        self.inner
    }
}

impl PartialEq for PackageName {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.inner, other.inner)
    }
}

impl Eq for PackageName {}

impl Hash for PackageName {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Equal names share an address, so hashing the pointer is sound
        std::ptr::hash(self.inner, state)
    }
}

impl PartialOrd for PackageName {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageName {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        self.inner.cmp(other.inner)
    }
}

impl fmt::Debug for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.inner, f)
    }
}

impl fmt::Display for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.inner, f)
    }
}

impl From<&str> for PackageName {
    fn from(s: &str) -> Self {
        PackageName::new(s)
    }
}

impl From<String> for PackageName {
    fn from(s: String) -> Self {
        PackageName::new(s)
    }
}
