use crate::record::TypeSummary;
use metascope_core::module::type_definitions;
use metascope_core::{DiscoveryConfig, Module, ReferenceResolver};
use serde::Serialize;
use std::path::Path;
use tabled::{Table, Tabled};

#[derive(Tabled)]
struct TypeRow {
    #[tabled(rename = "Type")]
    full_name: String,
    #[tabled(rename = "Flags")]
    flags: String,
    #[tabled(rename = "Base")]
    base: String,
    #[tabled(rename = "Members")]
    members: usize,
    #[tabled(rename = "Nested")]
    nested: usize,
}

#[derive(Serialize)]
struct InspectJson {
    path: String,
    identity: String,
    references: Vec<String>,
    types: Vec<TypeSummary>,
    code_bytes: usize,
}

pub fn run(
    config: &DiscoveryConfig,
    path: &Path,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let module = Module::open_handle(path)?;
    let resolver = ReferenceResolver::builder_from_config(config).build();
    let image = module.image();

    if json {
        let out = InspectJson {
            path: path.display().to_string(),
            identity: module.identity().to_string(),
            references: image.references.iter().map(|r| r.to_string()).collect(),
            types: type_definitions(&module, &resolver)
                .map(|def| TypeSummary::of(&def))
                .collect(),
            code_bytes: image.code.len(),
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("Module:     {}", module.identity());
    println!("Path:       {}", path.display());
    println!("Code bytes: {}", image.code.len());

    if image.references.is_empty() {
        println!("\nNo references.");
    } else {
        println!("\nReferences:");
        for (i, reference) in image.references.iter().enumerate() {
            println!("  [{}] {}", i, reference);
        }
    }

    let rows: Vec<TypeRow> = type_definitions(&module, &resolver)
        .map(|def| TypeRow {
            full_name: def.full_name(),
            flags: format!("{:?}", def.flags()),
            base: def.base().map(|b| b.full_name()).unwrap_or_default(),
            members: def.members().len(),
            nested: def.nested_types().len(),
        })
        .collect();

    if rows.is_empty() {
        println!("\nNo types declared.");
    } else {
        println!("\n{}", Table::new(rows));
    }
    Ok(())
}
