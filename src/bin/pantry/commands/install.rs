//! `pantry install` command

use indicatif::{ProgressBar, ProgressStyle};
use pantry::cache::{artifact, EnvCache};
use pantry::core::Settings;
use pantry::error::PantryError;
use pantry::ops::{install_project, InstallParams};

use crate::cli::InstallArgs;

pub fn execute(args: InstallArgs, offline: bool) -> Result<(), PantryError> {
    let root = super::project_root()?;
    let settings = Settings::load(&root).map_err(PantryError::Other)?;
    let registry = super::registry_for(&settings)?;
    let cache = artifact::global()?;
    let env_cache = EnvCache::new();

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    spinner.set_message("resolving and installing...");
    spinner.enable_steady_tick(std::time::Duration::from_millis(80));

    let params = InstallParams {
        offline,
        frozen: args.frozen,
        force: args.force,
        ignore_scripts: args.ignore_scripts,
        ..Default::default()
    };

    let result = install_project(&root, &registry, &cache, &env_cache, &params);
    spinner.finish_and_clear();

    let report = result?;

    for hint in &report.peer_hints {
        eprintln!("warning: {hint}");
    }
    for warning in &report.warnings {
        eprintln!("warning: {warning}");
    }

    if report.changed {
        println!(
            "Installed {} package(s) into {}",
            report.packages,
            report.env_dir.display()
        );
    } else {
        println!("Environment is up to date ({} package(s))", report.packages);
    }

    Ok(())
}
