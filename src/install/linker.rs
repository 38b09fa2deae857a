//! Linker strategies: where a package's files land under an environment.
//!
//! Hoisted: one flat directory per package name, shared by every
//! dependent. Isolated: one subtree per exact `name@version`; two
//! versions of a name can only coexist here.

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::core::{LinkerStrategy, PackageId};
use crate::util::fs as pantry_fs;

/// The directory a package extracts into, relative to the environment
/// root.
pub fn package_rel_dir(strategy: LinkerStrategy, id: PackageId) -> PathBuf {
    match strategy {
        LinkerStrategy::Hoisted => Path::new("packages").join(id.name().as_str()),
        LinkerStrategy::Isolated => Path::new("packages").join(id.key()),
    }
}

/// Link a package's `lib/` files into the environment's shared `lib/`.
/// Hard links where possible, copies across filesystems.
pub fn link_libs(package_dir: &Path, env_lib: &Path) -> Result<()> {
    let lib_dir = package_dir.join("lib");
    if !lib_dir.is_dir() {
        return Ok(());
    }

    pantry_fs::ensure_dir(env_lib)?;
    for entry in std::fs::read_dir(&lib_dir)? {
        let entry = entry?;
        let source = entry.path();
        let dest = env_lib.join(entry.file_name());
        if source.is_dir() {
            pantry_fs::copy_dir_all(&source, &dest)?;
        } else {
            pantry_fs::hard_link_or_copy(&source, &dest)?;
        }
    }
    Ok(())
}

/// Link a package's `share/` files into the environment's `share/`.
pub fn link_share(package_dir: &Path, env_share: &Path) -> Result<()> {
    let share_dir = package_dir.join("share");
    if !share_dir.is_dir() {
        return Ok(());
    }

    pantry_fs::ensure_dir(env_share)?;
    pantry_fs::copy_dir_all(&share_dir, env_share)
}
