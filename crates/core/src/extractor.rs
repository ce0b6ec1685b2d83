//! Structural metadata extraction from a single module file.

use crate::module::{Module, TypeDefinition, type_definitions};
use crate::resolver::ModuleResolver;
use metascope_image::ImageError;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{trace, warn};

#[derive(Debug, Error)]
#[error("cannot inspect module {}: {source}", .path.display())]
pub struct ExtractError {
    pub path: PathBuf,
    #[source]
    pub source: ImageError,
}

/// Outcome of inspecting one module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction<T> {
    /// The module-level filter rejected the module; no type was visited.
    Filtered,
    /// Selected records in declaration order, possibly empty.
    Selected(Vec<T>),
}

impl<T> Extraction<T> {
    pub fn is_filtered(&self) -> bool {
        matches!(self, Extraction::Filtered)
    }

    pub fn into_items(self) -> Vec<T> {
        match self {
            Extraction::Filtered => Vec::new(),
            Extraction::Selected(items) => items,
        }
    }
}

/// Runs a selector over the top-level type table of one module.
///
/// The module is opened structurally and dropped before returning, whatever the
/// outcome. Cross-module lookups requested by the selector go through `resolver`.
pub struct MetadataExtractor<'r> {
    resolver: &'r dyn ModuleResolver,
}

impl<'r> MetadataExtractor<'r> {
    pub fn new(resolver: &'r dyn ModuleResolver) -> Self {
        Self { resolver }
    }

    pub fn try_extract<T, S>(
        &self,
        path: &Path,
        selector: &S,
        filter: Option<&dyn Fn(&Module) -> bool>,
    ) -> Result<Extraction<T>, ExtractError>
    where
        S: Fn(&TypeDefinition<'_>) -> Option<T> + ?Sized,
    {
        let module = Module::open_handle(path).map_err(|source| ExtractError {
            path: path.to_path_buf(),
            source,
        })?;

        if let Some(filter) = filter {
            if !filter(&*module) {
                trace!("Module {} rejected by filter", path.display());
                return Ok(Extraction::Filtered);
            }
        }

        let items: Vec<T> = type_definitions(&module, self.resolver)
            .filter_map(|def| selector(&def))
            .collect();

        trace!(
            "Selected {} of {} types from {}",
            items.len(),
            module.type_count(),
            path.display()
        );
        Ok(Extraction::Selected(items))
    }

    /// Like [`try_extract`](Self::try_extract), but a structural failure is logged and
    /// yields an empty result.
    pub fn extract<T, S>(
        &self,
        path: &Path,
        selector: &S,
        filter: Option<&dyn Fn(&Module) -> bool>,
    ) -> Vec<T>
    where
        S: Fn(&TypeDefinition<'_>) -> Option<T> + ?Sized,
    {
        match self.try_extract(path, selector, filter) {
            Ok(extraction) => extraction.into_items(),
            Err(e) => {
                warn!("{}", e);
                Vec::new()
            }
        }
    }
}
