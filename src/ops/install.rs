//! The install operation: manifest to materialized environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::activation::ActivationHook;
use crate::cache::{ArtifactCache, EnvCache};
use crate::core::{manifest, Settings};
use crate::error::PantryError;
use crate::fetch::{effective_parallelism, Downloader, FetchOptions};
use crate::hooks::HookOptions;
use crate::install::{self, InstallRequest};
use crate::lockfile::{Lockfile, LOCKFILE_NAME};
use crate::registry::RegistryClient;
use crate::resolver::{ResolveOptions, Resolver};
use crate::util::process::CancelFlag;
use crate::util::{paths, Fingerprint};

/// Install inputs beyond the project itself.
#[derive(Debug, Clone, Default)]
pub struct InstallParams {
    /// Refuse the network (CLI `--offline` or `PANTRY_OFFLINE`)
    pub offline: bool,

    /// Fail instead of rewriting an out-of-date lockfile
    pub frozen: bool,

    /// Rewrite shims and re-materialize even when current
    pub force: bool,

    /// Skip lifecycle scripts
    pub ignore_scripts: bool,

    /// Environments root override (defaults to the user data dir)
    pub environments_root: Option<PathBuf>,

    /// Per-script timeout
    pub script_timeout: Option<Duration>,
}

/// What an install did, for presentation.
#[derive(Debug)]
pub struct InstallReport {
    pub packages: usize,
    pub env_dir: PathBuf,
    pub env_hash: Fingerprint,
    pub changed: bool,
    pub peer_hints: Vec<String>,
    pub warnings: Vec<String>,
}

/// Resolve, fetch, verify, and materialize a project.
pub fn install_project(
    project_root: &Path,
    registry: &dyn RegistryClient,
    cache: &ArtifactCache,
    env_cache: &EnvCache,
    params: &InstallParams,
) -> Result<InstallReport, PantryError> {
    let project_manifest = manifest::load(project_root)?;
    let settings = Settings::load(project_root).map_err(PantryError::Other)?;

    let lockfile_path = project_root.join(LOCKFILE_NAME);
    let existing_lockfile = Lockfile::load_if_exists(&lockfile_path)?;

    let frozen = params.frozen || settings.install.frozen_lockfile;
    if frozen && existing_lockfile.is_none() {
        return Err(PantryError::LockfileOutOfDate);
    }

    let offline = params.offline || settings.knobs.offline;

    // Offline with a lockfile: trust the pins outright, zero network
    let resolution = if offline && existing_lockfile.is_some() {
        let lockfile = existing_lockfile.as_ref().expect("checked above");
        crate::resolver::Resolution {
            graph: crate::resolver::graph_from_lockfile(lockfile)?,
            peer_hints: Vec::new(),
            warnings: Vec::new(),
        }
    } else {
        let options = ResolveOptions::from_settings(&settings.install, &project_manifest);
        Resolver::new(registry, existing_lockfile.as_ref(), options)
            .resolve(&project_manifest)?
    };

    let fresh_lockfile = resolution
        .graph
        .to_lockfile(project_manifest.version.as_ref().map(|v| v.to_string()));

    if frozen {
        let current = existing_lockfile
            .as_ref()
            .is_some_and(|l| l.same_packages(&fresh_lockfile));
        if !current {
            return Err(PantryError::LockfileOutOfDate);
        }
    }

    let fetch_options = FetchOptions {
        parallelism: effective_parallelism(settings.knobs.max_concurrent)?,
        offline,
        ..Default::default()
    };
    let downloader = Downloader::new(registry, cache, fetch_options);
    let artifacts = downloader.ensure_all(&resolution.graph)?;

    let manifest_bytes =
        std::fs::read(&project_manifest.path).map_err(|e| PantryError::ManifestParse {
            reason: format!("{}: {e}", project_manifest.path.display()),
        })?;
    let env_hash = ActivationHook::env_hash(&project_manifest.path, &manifest_bytes);
    let environments_root = params
        .environments_root
        .clone()
        .unwrap_or_else(paths::environments_root);

    let hook_options = HookOptions {
        timeout: params.script_timeout.or(HookOptions::default().timeout),
        ignore_scripts: params.ignore_scripts,
    };

    let outcome = install::install(&InstallRequest {
        manifest: &project_manifest,
        graph: &resolution.graph,
        artifacts: &artifacts,
        cache,
        environments_root: &environments_root,
        env_hash,
        linker: settings.install.linker,
        force: params.force,
        hook_options,
        cancel: CancelFlag::new(),
    })?;

    if !frozen {
        let write_needed = existing_lockfile
            .as_ref()
            .map(|l| !l.same_packages(&fresh_lockfile))
            .unwrap_or(true);
        if write_needed {
            fresh_lockfile.save(&lockfile_path)?;
        }
    }

    // The environment moved under the hook's feet; drop any stale payload
    env_cache.invalidate(&env_hash);

    Ok(InstallReport {
        packages: resolution.graph.len(),
        env_dir: outcome.env_dir,
        env_hash,
        changed: outcome.changed,
        peer_hints: resolution.peer_hints,
        warnings: resolution.warnings,
    })
}
