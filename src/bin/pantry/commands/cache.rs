//! `pantry cache` command

use pantry::cache::artifact;
use pantry::error::PantryError;

use crate::cli::{CacheArgs, CacheCommands};

pub fn execute(args: CacheArgs) -> Result<(), PantryError> {
    let cache = artifact::global()?;

    match args.command {
        CacheCommands::Stats => {
            let stats = cache.stats();
            println!("packages:          {}", stats.packages);
            println!("bytes on disk:     {}", format_size(stats.bytes));
            println!("bytes unpacked:    {}", format_size(stats.uncompressed_bytes));
            println!("hits / misses:     {} / {}", stats.hits, stats.misses);
            println!("hit rate:          {:.1}%", stats.hit_rate * 100.0);
            println!("evictions:         {}", stats.evictions);
            println!("compression ratio: {:.2}x", stats.compression_ratio);
            Ok(())
        }
        CacheCommands::Prune => {
            let removed = cache.prune()?;
            println!("Pruned {removed} expired artifact(s)");
            Ok(())
        }
        CacheCommands::Clean => {
            let removed = cache.clean()?;
            println!("Removed {removed} artifact(s)");
            Ok(())
        }
    }
}

fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}
