//! Executable shim generation.
//!
//! A shim is a small launcher in the environment's `bin/` that sets the
//! package's environment variables and execs the real binary. Paths are
//! resolved relative to the shim itself, so an environment directory can
//! be staged and then renamed into place without rewriting anything.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};

use crate::util::{fs as pantry_fs, paths};

/// Render the shim script for a binary. A relative `target` resolves
/// against the environment root (the shim's parent directory); an
/// absolute one (workspace-local packages) execs directly.
pub fn render(target: &str, env: &BTreeMap<String, String>) -> String {
    let lib_var = paths::library_path_var();

    let mut script = String::new();
    script.push_str("#!/bin/sh\n");
    script.push_str("here=\"$(cd \"$(dirname \"$0\")\" && pwd)\"\n");
    script.push_str(&format!(
        "export {lib_var}=\"$here/../lib${{{lib_var}:+:${lib_var}}}\"\n"
    ));
    for (key, value) in env {
        script.push_str(&format!("export {key}=\"{value}\"\n"));
    }
    if target.starts_with('/') {
        script.push_str(&format!("exec \"{target}\" \"$@\"\n"));
    } else {
        script.push_str(&format!("exec \"$here/../{target}\" \"$@\"\n"));
    }
    script
}

/// Write a shim. Idempotent: an existing identical shim is left alone;
/// `force` overwrites unconditionally.
pub fn write(
    shim_path: &Path,
    target_rel: &str,
    env: &BTreeMap<String, String>,
    force: bool,
) -> Result<()> {
    let content = render(target_rel, env);

    if !force {
        if let Ok(existing) = std::fs::read_to_string(shim_path) {
            if existing == content {
                return Ok(());
            }
        }
    }

    pantry_fs::atomic_write(shim_path, content.as_bytes())
        .with_context(|| format!("failed to write shim {}", shim_path.display()))?;
    pantry_fs::make_executable(shim_path)?;
    Ok(())
}
