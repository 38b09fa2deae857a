//! `pantry tree` command

use pantry::core::{manifest, Settings};
use pantry::error::PantryError;
use pantry::lockfile::{Lockfile, LOCKFILE_NAME};
use pantry::ops::render_tree;
use pantry::resolver::{ResolveOptions, Resolver};

use crate::cli::TreeArgs;

pub fn execute(_args: TreeArgs) -> Result<(), PantryError> {
    let root = super::project_root()?;
    let project_manifest = manifest::load(&root)?;
    let settings = Settings::load(&root).map_err(PantryError::Other)?;
    let registry = super::registry_for(&settings)?;

    let lockfile = Lockfile::load_if_exists(&root.join(LOCKFILE_NAME))?;
    let options = ResolveOptions::from_settings(&settings.install, &project_manifest);

    let resolution = Resolver::new(&registry, lockfile.as_ref(), options)
        .resolve(&project_manifest)?;

    print!("{}", render_tree(&resolution.graph));
    Ok(())
}
