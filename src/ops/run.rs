//! `pantry run <script>`: execute a manifest script inside the project's
//! activated environment.

use std::collections::BTreeMap;
use std::path::Path;

use crate::activation::{Activation, ActivationHook, HookConfig};
use crate::cache::{ArtifactCache, EnvCache};
use crate::core::manifest;
use crate::error::PantryError;
use crate::hooks::{self, HookOptions};
use crate::ops::install::{install_project, InstallParams};
use crate::registry::RegistryClient;
use crate::util::process::CancelFlag;

/// Run a named script with the activation payload applied. Installs
/// first when the environment is missing or stale.
pub fn run_project_script(
    project_root: &Path,
    script: &str,
    registry: &dyn RegistryClient,
    cache: &ArtifactCache,
    env_cache: &EnvCache,
    params: &InstallParams,
    hook_options: &HookOptions,
) -> Result<(), PantryError> {
    let project_manifest = manifest::load(project_root)?;
    let command = project_manifest
        .scripts
        .get(script)
        .cloned()
        .ok_or_else(|| PantryError::LifecycleScriptFailed {
            name: format!("{script} (not declared in the manifest)"),
            code: 1,
        })?;

    let config = HookConfig {
        environments_root: params
            .environments_root
            .clone()
            .unwrap_or_else(crate::util::paths::environments_root),
        ..Default::default()
    };
    let hook = ActivationHook::new(env_cache, config);

    let activation = hook.activate(project_root, &mut |_, _| {
        install_project(project_root, registry, cache, env_cache, params).map(|_| ())
    })?;

    let mut env: BTreeMap<String, String> = std::env::vars().collect();
    if let Activation::Activate(snapshot) = activation {
        env.insert("PATH".to_string(), snapshot.path_value);
        env.extend(snapshot.env_vars);
    }

    hooks::run_script(
        script,
        &command,
        project_root,
        &env,
        hook_options,
        &CancelFlag::new(),
    )
}
