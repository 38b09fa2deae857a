//! CLI definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Pantry - a cross-project dependency manager
#[derive(Parser)]
#[command(name = "pantry")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable verbose output (debug/info)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Run without network access (PANTRY_OFFLINE=1 does the same)
    #[arg(long, global = true)]
    pub offline: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Resolve, download, and materialize the project's environment
    Install(InstallArgs),

    /// Run a manifest script inside the activated environment
    Run(RunArgs),

    /// Manage the artifact cache
    Cache(CacheArgs),

    /// Manage materialized environments
    Env(EnvArgs),

    /// Print the activation payload for a directory (shell hook)
    Hook(HookArgs),

    /// Display the resolved dependency tree
    Tree(TreeArgs),
}

#[derive(Args)]
pub struct InstallArgs {
    /// Fail if pantry.lock would change
    #[arg(long)]
    pub frozen: bool,

    /// Re-materialize even when the environment is current
    #[arg(long)]
    pub force: bool,

    /// Skip lifecycle scripts
    #[arg(long)]
    pub ignore_scripts: bool,
}

#[derive(Args)]
pub struct RunArgs {
    /// Script name from the manifest's `scripts` table
    pub script: String,
}

#[derive(Args)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommands,
}

#[derive(Subcommand)]
pub enum CacheCommands {
    /// Show cache statistics
    Stats,

    /// Remove expired artifacts
    Prune,

    /// Remove all cached artifacts
    Clean,
}

#[derive(Args)]
pub struct EnvArgs {
    #[command(subcommand)]
    pub command: EnvCommands,
}

#[derive(Subcommand)]
pub enum EnvCommands {
    /// List materialized environments
    List,

    /// Remove one environment by hash
    Remove { hash: String },

    /// Remove all environments
    Clean,
}

#[derive(Args)]
pub struct HookArgs {
    /// Directory to activate (defaults to the working directory)
    pub dir: Option<PathBuf>,
}

#[derive(Args)]
pub struct TreeArgs {}
