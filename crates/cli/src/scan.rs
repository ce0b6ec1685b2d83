use crate::record::TypeSummary;
use clap::Args;
use metascope_core::{
    DiscoveryConfig, Module, ScanOutcome, ScanReport, TypeDefinition, TypeDiscovery, TypeMap,
    filters,
};
use serde::Serialize;
use std::path::PathBuf;
use tabled::{Table, Tabled};
use tracing::debug;

#[derive(Args, Debug)]
pub struct ScanArgs {
    /// Directory to scan recursively
    #[arg(value_name = "DIR")]
    pub dir: PathBuf,

    /// Only types whose base chain contains this full type name
    #[arg(long, value_name = "TYPE")]
    pub base: Option<String>,

    /// Only types carrying an attribute of this full type name
    #[arg(long, value_name = "TYPE")]
    pub attribute: Option<String>,

    /// Only modules that reference this module name
    #[arg(long, value_name = "MODULE")]
    pub references: Option<String>,

    /// Reuse and update the named cache
    #[arg(long, value_name = "NAME", conflicts_with = "no_cache")]
    pub cache: Option<String>,

    /// Never read or write caches
    #[arg(long)]
    pub no_cache: bool,

    #[arg(long, value_name = "DIR")]
    pub runtime_dir: Option<PathBuf>,

    #[arg(long, value_name = "DIR")]
    pub plugin_dir: Option<PathBuf>,

    #[arg(long, value_name = "DIR")]
    pub managed_dir: Option<PathBuf>,

    /// Additional search directory for references, lowest priority. Repeatable.
    #[arg(long = "search-dir", value_name = "DIR")]
    pub extra_dirs: Vec<PathBuf>,

    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

impl ScanArgs {
    fn apply(&self, mut config: DiscoveryConfig) -> DiscoveryConfig {
        if self.no_cache {
            config.enable_cache = false;
        }
        if let Some(dir) = &self.runtime_dir {
            config.paths.runtime_dir = Some(dir.clone());
        }
        if let Some(dir) = &self.plugin_dir {
            config.paths.plugin_dir = Some(dir.clone());
        }
        if let Some(dir) = &self.managed_dir {
            config.paths.managed_dir = Some(dir.clone());
        }
        config.paths.extra_dirs.extend(self.extra_dirs.iter().cloned());
        config
    }

    /// Whether `def` passes the type-level criteria. Without criteria every public
    /// type is kept.
    fn selects(&self, def: &TypeDefinition<'_>) -> bool {
        if let Some(base) = &self.base {
            match def.derives_from(base) {
                Ok(true) => {}
                Ok(false) => return false,
                Err(e) => {
                    debug!("{} skipped: {}", def.full_name(), e);
                    return false;
                }
            }
        }
        if let Some(attribute) = &self.attribute {
            if !def.has_attribute(attribute) {
                return false;
            }
        }
        self.base.is_some() || self.attribute.is_some() || def.is_public()
    }
}

#[derive(Tabled)]
struct TypeRow {
    #[tabled(rename = "Module")]
    module: String,
    #[tabled(rename = "Type")]
    full_name: String,
    #[tabled(rename = "Base")]
    base: String,
    #[tabled(rename = "Attributes")]
    attributes: String,
}

#[derive(Serialize)]
struct ScanJson<'a> {
    types: &'a TypeMap<TypeSummary>,
    report: &'a ScanReport,
}

pub fn run(config: DiscoveryConfig, args: ScanArgs) -> Result<(), Box<dyn std::error::Error>> {
    let engine = TypeDiscovery::new(args.apply(config));

    let selector = |def: &TypeDefinition<'_>| args.selects(def).then(|| TypeSummary::of(def));
    let module_filter = args.references.clone().map(filters::references_module);
    let filter = module_filter
        .as_deref()
        .map(|f| f as &dyn Fn(&Module) -> bool);

    let ScanOutcome { types, report } = match &args.cache {
        Some(name) => engine.scan_cached(&args.dir, &selector, filter, name)?,
        None => engine.scan(&args.dir, &selector, filter)?,
    };

    if args.json {
        let out = ScanJson {
            types: &types,
            report: &report,
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let rows: Vec<TypeRow> = types
        .iter()
        .flat_map(|(path, items)| {
            let module = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            items.iter().map(move |t| TypeRow {
                module: module.clone(),
                full_name: t.full_name.clone(),
                base: t.base.clone().unwrap_or_default(),
                attributes: t.attributes.join(", "),
            })
        })
        .collect();

    if rows.is_empty() {
        println!("No matching types found.");
    } else {
        println!("{}", Table::new(rows));
    }
    println!(
        "{} modules scanned ({} cached, {} extracted, {} filtered, {} failed) in {:?}",
        report.candidates,
        report.cache_hits,
        report.extracted,
        report.filtered,
        report.failed,
        report.duration
    );
    Ok(())
}
