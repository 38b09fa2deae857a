//! `pantry env` command

use pantry::error::PantryError;
use pantry::install::EnvManifest;
use pantry::util::paths;

use crate::cli::{EnvArgs, EnvCommands};

pub fn execute(args: EnvArgs) -> Result<(), PantryError> {
    let root = paths::environments_root();

    match args.command {
        EnvCommands::List => {
            if !root.exists() {
                println!("No environments");
                return Ok(());
            }

            let mut entries: Vec<_> = std::fs::read_dir(&root)
                .map_err(|e| PantryError::Permission {
                    path: format!("{}: {e}", root.display()),
                })?
                .filter_map(Result::ok)
                .filter(|e| e.path().is_dir())
                .collect();
            entries.sort_by_key(|e| e.file_name());

            if entries.is_empty() {
                println!("No environments");
                return Ok(());
            }

            for entry in entries {
                let hash = entry.file_name().to_string_lossy().into_owned();
                match EnvManifest::load(&entry.path()) {
                    Some(manifest) => {
                        println!(
                            "{hash}  {} package(s)  {}",
                            manifest.packages.len(),
                            manifest.source_manifest.display()
                        );
                    }
                    None => println!("{hash}  (no manifest)"),
                }
            }
            Ok(())
        }
        EnvCommands::Remove { hash } => {
            let dir = root.join(&hash);
            if !dir.exists() {
                println!("No environment {hash}");
                return Ok(());
            }
            std::fs::remove_dir_all(&dir).map_err(|e| PantryError::Permission {
                path: format!("{}: {e}", dir.display()),
            })?;
            println!("Removed {hash}");
            Ok(())
        }
        EnvCommands::Clean => {
            let mut removed = 0usize;
            if root.exists() {
                for entry in std::fs::read_dir(&root)
                    .map_err(|e| PantryError::Permission {
                        path: format!("{}: {e}", root.display()),
                    })?
                    .filter_map(Result::ok)
                {
                    if entry.path().is_dir() {
                        std::fs::remove_dir_all(entry.path()).map_err(|e| {
                            PantryError::Permission {
                                path: format!("{}: {e}", entry.path().display()),
                            }
                        })?;
                        removed += 1;
                    }
                }
            }
            println!("Removed {removed} environment(s)");
            Ok(())
        }
    }
}
