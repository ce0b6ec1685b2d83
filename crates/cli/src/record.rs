use metascope_core::{CacheableRecord, TypeDefinition};
use serde::{Deserialize, Serialize};

/// What the CLI records about each selected type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeSummary {
    pub full_name: String,
    pub base: Option<String>,
    pub interfaces: Vec<String>,
    pub attributes: Vec<String>,
    pub flags: u32,
    pub members: usize,
}

impl CacheableRecord for TypeSummary {
    const SCHEMA: &'static str = "metascope.type-summary";
}

impl TypeSummary {
    pub fn of(def: &TypeDefinition<'_>) -> Self {
        Self {
            full_name: def.full_name(),
            base: def.base().map(|b| b.full_name()),
            interfaces: def.interfaces().iter().map(|i| i.full_name()).collect(),
            attributes: def
                .attributes()
                .iter()
                .map(|a| a.attribute_type.full_name())
                .collect(),
            flags: def.flags().bits(),
            members: def.members().len(),
        }
    }
}
