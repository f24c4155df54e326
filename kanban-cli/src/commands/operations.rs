use colored::Colorize;
use kanban_core::{CachePolicy, Registry};
use kanban_gateway::catalog;

use super::CliResult;

pub fn run(table: bool) -> CliResult {
    let registry = catalog::registry()?;
    if table {
        print_table(&registry);
    } else {
        println!("{}", serde_json::to_string_pretty(&registry.export())?);
    }
    Ok(())
}

fn print_table(registry: &Registry) {
    println!(
        "  {:<26} {:<20} {:<6} {}",
        "OPERATION".dimmed(),
        "BACKENDS".dimmed(),
        "IDEM".dimmed(),
        "CACHE".dimmed()
    );
    println!("  {}", "-".repeat(72).dimmed());
    for descriptor in registry.iter() {
        let backends: Vec<&str> = descriptor.backends.iter().map(|b| b.as_str()).collect();
        let cache = match &descriptor.cache_policy {
            CachePolicy::Cacheable { ttl, key_spaces } => {
                format!("{}s [{}]", ttl.as_secs(), key_spaces.join(", ")).green()
            }
            CachePolicy::Invalidates { key_spaces } => {
                format!("invalidates [{}]", key_spaces.join(", ")).yellow()
            }
            CachePolicy::Never => "-".normal(),
        };
        println!(
            "  {:<26} {:<20} {:<6} {}",
            descriptor.name.bold(),
            backends.join(" > "),
            if descriptor.idempotent { "yes" } else { "no" },
            cache
        );
    }
}
