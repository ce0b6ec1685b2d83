mod cache;
mod inspect;
mod record;
mod scan;

pub use record::TypeSummary;

use clap::{Parser, Subcommand};
use metascope_core::DiscoveryConfig;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "metascope",
    version,
    about = "Discover and cache type metadata in module files",
    long_about = "Metascope reads module files structurally, without executing them, and reports \
                  the type definitions they declare. Results can be cached per module so repeated \
                  scans of unchanged directories are served from disk."
)]
pub struct Cli {
    /// JSON configuration file. METASCOPE_* environment variables override its values.
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Mirror log output to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan a directory tree for module files and list matching types
    Scan(scan::ScanArgs),
    /// Show the identity, references and types of one module file
    Inspect {
        #[arg(value_name = "FILE")]
        path: PathBuf,

        /// Print JSON instead of tables
        #[arg(long)]
        json: bool,
    },
    /// Manage on-disk caches
    #[command(subcommand)]
    Cache(cache::CacheCommands),
}

pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let _guard = metascope_core::logging::init_logging("cli", cli.verbose);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Scan(args) => scan::run(config, args),
        Commands::Inspect { path, json } => inspect::run(&config, &path, json),
        Commands::Cache(cmd) => cache::run(&config, cmd),
    }
}

fn load_config(path: Option<&std::path::Path>) -> metascope_core::Result<DiscoveryConfig> {
    let base = match path {
        Some(path) => DiscoveryConfig::from_json_file(path)?,
        None => DiscoveryConfig::default(),
    };
    Ok(base.with_env(|key| std::env::var(key).ok()))
}

/// Human-readable byte count.
pub(crate) fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / 1024.0 / 1024.0)
    }
}

/// Coarse age of a unix timestamp relative to now.
pub(crate) fn format_age(created_at: u64) -> String {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let age = now.saturating_sub(created_at);
    if age < 60 {
        format!("{}s ago", age)
    } else if age < 3600 {
        format!("{}m ago", age / 60)
    } else if age < 86400 {
        format!("{}h ago", age / 3600)
    } else {
        format!("{}d ago", age / 86400)
    }
}
