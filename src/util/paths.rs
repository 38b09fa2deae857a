//! Platform directories and environment variable names.
//!
//! Follows the OS convention for each root: XDG on Linux/BSD,
//! `Library/Caches` / `Library/Application Support` on macOS, and
//! `%LOCALAPPDATA%` on Windows. Resolved once at startup.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use directories::ProjectDirs;

/// Project directories for pantry
static PROJECT_DIRS: LazyLock<Option<ProjectDirs>> =
    LazyLock::new(|| ProjectDirs::from("dev", "pantry", "pantry"));

/// The user's home directory.
pub fn home_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map(|d| d.home_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Root for downloaded artifacts (`<cache>/pantry`).
pub fn cache_root() -> PathBuf {
    match PROJECT_DIRS.as_ref() {
        Some(dirs) => dirs.cache_dir().to_path_buf(),
        None => home_dir().join(".pantry").join("cache"),
    }
}

/// Root for materialized environments (`<data>/pantry`).
pub fn data_root() -> PathBuf {
    match PROJECT_DIRS.as_ref() {
        Some(dirs) => dirs.data_dir().to_path_buf(),
        None => home_dir().join(".pantry").join("data"),
    }
}

/// Root for user-level configuration.
pub fn config_root() -> PathBuf {
    match PROJECT_DIRS.as_ref() {
        Some(dirs) => dirs.config_dir().to_path_buf(),
        None => home_dir().join(".pantry").join("config"),
    }
}

/// The artifact store directory (`<cache>/pantry/packages`).
pub fn packages_root() -> PathBuf {
    cache_root().join("packages")
}

/// The environments directory (`<data>/pantry/environments`).
pub fn environments_root() -> PathBuf {
    data_root().join("environments")
}

/// The directory for one environment, keyed by its hex hash.
pub fn environment_dir(root: &Path, hash_hex: &str) -> PathBuf {
    root.join(hash_hex)
}

/// Name of the dynamic-loader search path variable on this OS.
pub fn library_path_var() -> &'static str {
    if cfg!(target_os = "macos") {
        "DYLD_LIBRARY_PATH"
    } else if cfg!(windows) {
        "PATH"
    } else {
        "LD_LIBRARY_PATH"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roots_are_absolute() {
        assert!(cache_root().is_absolute());
        assert!(data_root().is_absolute());
        assert!(config_root().is_absolute());
    }

    #[test]
    fn test_store_layout() {
        assert!(packages_root().ends_with("packages"));
        assert!(environments_root().ends_with("environments"));
    }

    #[test]
    fn test_library_path_var_per_os() {
        let var = library_path_var();
        assert!(["DYLD_LIBRARY_PATH", "LD_LIBRARY_PATH", "PATH"].contains(&var));
    }
}
