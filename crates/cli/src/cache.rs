use crate::{format_age, format_size};
use clap::Subcommand;
use metascope_core::{AssemblyCache, DiscoveryConfig};
use tabled::{Table, Tabled};

#[derive(Subcommand)]
pub enum CacheCommands {
    /// Show cache statistics
    Stats,
    /// List cache files
    List {
        /// Sort by size or date
        #[arg(long, value_parser = ["size", "date"])]
        sort: Option<String>,
    },
    /// Remove one named cache, or every cache when no name is given
    Clear {
        #[arg(value_name = "NAME")]
        name: Option<String>,
    },
}

#[derive(Tabled)]
struct CacheRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Schema")]
    schema: String,
    #[tabled(rename = "Modules")]
    entries: u64,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "Age")]
    age: String,
}

pub fn run(config: &DiscoveryConfig, cmd: CacheCommands) -> Result<(), Box<dyn std::error::Error>> {
    let cache = AssemblyCache::from_config(config);

    match cmd {
        CacheCommands::Stats => {
            let stats = cache.stats();
            println!("Cache Directory: {}", stats.cache_dir.display());
            println!("Enabled:         {}", stats.enabled);
            println!("Caches:          {}", stats.total_caches);
            println!("Cached Modules:  {}", stats.total_entries);
            println!("Total Size:      {}", format_size(stats.total_bytes));
        }
        CacheCommands::List { sort } => {
            let mut caches = cache.list();
            match sort.as_deref() {
                Some("size") => caches.sort_by(|a, b| b.size_bytes.cmp(&a.size_bytes)),
                Some("date") => caches.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
                _ => {}
            }

            let rows: Vec<CacheRow> = caches
                .into_iter()
                .map(|c| CacheRow {
                    name: c.name,
                    schema: format!("{} v{}", c.schema, c.schema_version),
                    entries: c.entry_count,
                    size: format_size(c.size_bytes),
                    age: format_age(c.created_at),
                })
                .collect();

            if rows.is_empty() {
                println!("No caches found in {}.", cache.base_dir().display());
            } else {
                println!("{}", Table::new(rows));
            }
        }
        CacheCommands::Clear { name: Some(name) } => {
            if cache.remove(&name)? {
                println!("Cache '{}' removed.", name);
            } else {
                println!("No cache named '{}'.", name);
            }
        }
        CacheCommands::Clear { name: None } => {
            let removed = cache.clear()?;
            println!("Removed {} caches.", removed);
        }
    }

    Ok(())
}
