//! `pantry run` command

use pantry::cache::{artifact, EnvCache};
use pantry::error::PantryError;
use pantry::hooks::HookOptions;
use pantry::ops::run_project_script;
use pantry::ops::InstallParams;

use crate::cli::RunArgs;

pub fn execute(args: RunArgs, offline: bool) -> Result<(), PantryError> {
    let root = super::project_root()?;
    let settings = pantry::core::Settings::load(&root).map_err(PantryError::Other)?;
    let registry = super::registry_for(&settings)?;
    let cache = artifact::global()?;
    let env_cache = EnvCache::new();

    let params = InstallParams {
        offline,
        ..Default::default()
    };

    run_project_script(
        &root,
        &args.script,
        &registry,
        &cache,
        &env_cache,
        &params,
        &HookOptions::default(),
    )
}
