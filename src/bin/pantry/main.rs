//! Pantry CLI - per-project dev environments from a manifest

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{Cli, Commands};
use pantry::PantryError;

fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("pantry=debug")
    } else if cli.quiet {
        EnvFilter::new("pantry=error")
    } else {
        EnvFilter::new("pantry=info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(cli) {
        pantry::util::diagnostic::emit(&err.to_diagnostic(), true);
        std::process::exit(err.exit_code());
    }
}

fn run(cli: Cli) -> Result<(), PantryError> {
    let offline = cli.offline;
    match cli.command {
        Commands::Install(args) => commands::install::execute(args, offline),
        Commands::Run(args) => commands::run::execute(args, offline),
        Commands::Cache(args) => commands::cache::execute(args),
        Commands::Env(args) => commands::env::execute(args),
        Commands::Hook(args) => commands::hook::execute(args, offline),
        Commands::Tree(args) => commands::tree::execute(args),
    }
}
