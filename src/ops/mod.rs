//! High-level operations composing the resolver, caches, downloader,
//! and installer. The CLI calls these; they own orchestration, not
//! presentation.

pub mod install;
pub mod run;
pub mod tree;

pub use install::{install_project, InstallParams, InstallReport};
pub use run::run_project_script;
pub use tree::render_tree;
