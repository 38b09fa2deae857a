//! Command implementations. Thin wrappers over `pantry::ops`.

pub mod cache;
pub mod env;
pub mod hook;
pub mod install;
pub mod run;
pub mod tree;

use std::path::PathBuf;

use pantry::core::Settings;
use pantry::error::PantryError;
use pantry::registry::http::DEFAULT_REGISTRY_URL;
use pantry::registry::HttpRegistry;

/// The working directory, which doubles as the project root.
pub fn project_root() -> Result<PathBuf, PantryError> {
    std::env::current_dir()
        .map_err(|e| PantryError::Other(anyhow::anyhow!("failed to get current directory: {e}")))
}

/// Build the registry client for a project from its settings.
pub fn registry_for(settings: &Settings) -> Result<HttpRegistry, PantryError> {
    let base = settings
        .registry_url()
        .unwrap_or(DEFAULT_REGISTRY_URL)
        .to_string();
    let timeout = settings
        .knobs
        .download_timeout_ms
        .map(std::time::Duration::from_millis);
    HttpRegistry::new(&base, &settings.npmrc, timeout)
}
