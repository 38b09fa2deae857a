//! `pantry hook` command
//!
//! Prints the activation payload as `KEY=VALUE` lines; shell integrations
//! translate those into exports for their dialect.

use pantry::activation::{Activation, ActivationHook, HookConfig};
use pantry::cache::environment::DEFAULT_TTL;
use pantry::cache::{artifact, EnvCache};
use pantry::core::settings::EnvKnobs;
use pantry::error::PantryError;
use pantry::ops::{install_project, InstallParams};

use crate::cli::HookArgs;

pub fn execute(args: HookArgs, offline: bool) -> Result<(), PantryError> {
    let dir = match args.dir {
        Some(dir) => dir,
        None => super::project_root()?,
    };

    let knobs = EnvKnobs::from_env();
    let config = HookConfig {
        ttl: knobs
            .cache_ttl
            .map(std::time::Duration::from_secs)
            .unwrap_or(DEFAULT_TTL),
        no_cache: knobs.no_cache,
        ..Default::default()
    };

    let env_cache = EnvCache::new();
    let hook = ActivationHook::new(&env_cache, config);

    let activation = hook.activate(&dir, &mut |manifest_path, _hash| {
        let root = manifest_path.parent().unwrap_or(&dir).to_path_buf();
        let settings = pantry::core::Settings::load(&root).map_err(PantryError::Other)?;
        let registry = super::registry_for(&settings)?;
        let cache = artifact::global()?;

        let params = InstallParams {
            offline,
            ..Default::default()
        };
        install_project(&root, &registry, &cache, &env_cache, &params).map(|_| ())
    })?;

    match activation {
        Activation::NoProject => Ok(()),
        Activation::Activate(snapshot) => {
            println!("PATH={}", snapshot.path_value);
            for (key, value) in &snapshot.env_vars {
                println!("{key}={value}");
            }
            Ok(())
        }
    }
}
