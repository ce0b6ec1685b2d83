//! Reference resolution for metadata inspection.
//!
//! Resolution runs entirely outside any host loader: a reference identity is
//! matched against module files in a prioritized list of search directories, and
//! only when every directory misses is the fallback hook chain consulted.

mod caching;

pub use caching::CachingResolver;

use crate::config::DiscoveryConfig;
use crate::module::{Module, ModuleHandle};
use metascope_image::{ModuleIdentity, peek_identity};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};
use walkdir::WalkDir;

#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    #[error("unresolved module reference: {0}")]
    Unresolved(ModuleIdentity),
    #[error("type {type_name} not found in module {module}")]
    TypeNotFound { type_name: String, module: String },
    #[error("reference index {index} is not declared by module {module}")]
    InvalidReference { index: u32, module: String },
    #[error("base chain of {type_name} exceeds {limit} levels")]
    ChainTooDeep { type_name: String, limit: usize },
}

/// Locates and opens the module a reference identity points to.
pub trait ModuleResolver: Send + Sync {
    fn resolve(&self, identity: &ModuleIdentity) -> Result<ModuleHandle, ResolveError>;
}

impl<R: ModuleResolver + ?Sized> ModuleResolver for Arc<R> {
    fn resolve(&self, identity: &ModuleIdentity) -> Result<ModuleHandle, ResolveError> {
        (**self).resolve(identity)
    }
}

/// Resolver that never finds anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullResolver;

impl ModuleResolver for NullResolver {
    fn resolve(&self, identity: &ModuleIdentity) -> Result<ModuleHandle, ResolveError> {
        Err(ResolveError::Unresolved(identity.clone()))
    }
}

/// Caller-registered hook tried after all search directories miss.
pub trait FallbackResolver: Send + Sync {
    fn resolve(&self, identity: &ModuleIdentity) -> Option<ModuleHandle>;
}

impl<F> FallbackResolver for F
where
    F: Fn(&ModuleIdentity) -> Option<ModuleHandle> + Send + Sync,
{
    fn resolve(&self, identity: &ModuleIdentity) -> Option<ModuleHandle> {
        self(identity)
    }
}

/// Search-path resolver with an ordered fallback hook chain.
///
/// Configuration is fixed at build time; the resolver itself holds no mutable state.
pub struct ReferenceResolver {
    search_dirs: Vec<PathBuf>,
    extension: String,
    fallbacks: Vec<Arc<dyn FallbackResolver>>,
}

impl ReferenceResolver {
    pub fn builder() -> ReferenceResolverBuilder {
        ReferenceResolverBuilder::new()
    }

    /// Builder pre-populated with the configured search path list and module extension.
    pub fn builder_from_config(config: &DiscoveryConfig) -> ReferenceResolverBuilder {
        ReferenceResolverBuilder::new()
            .extension(config.module_extension.clone())
            .search_dirs(config.paths.search_path_list())
    }

    pub fn search_dirs(&self) -> &[PathBuf] {
        &self.search_dirs
    }

    pub fn fallback_count(&self) -> usize {
        self.fallbacks.len()
    }

    /// Look for a module satisfying `identity` inside `dir`.
    ///
    /// The directory itself is probed before its subdirectories; within each level
    /// entries are visited in file-name order. The first candidate that parses and
    /// declares a satisfying identity wins.
    fn probe_directory(&self, dir: &Path, identity: &ModuleIdentity) -> Option<ModuleHandle> {
        if !dir.is_dir() {
            return None;
        }

        let file_name = format!("{}.{}", identity.name, self.extension);
        let matches = |entry: &walkdir::DirEntry| {
            entry.file_type().is_file()
                && entry
                    .file_name()
                    .to_str()
                    .is_some_and(|n| n.eq_ignore_ascii_case(&file_name))
        };

        let shallow = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(matches);
        let deep = WalkDir::new(dir)
            .min_depth(2)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(matches);

        for entry in shallow.chain(deep) {
            let path = entry.path();
            match peek_identity(path) {
                Ok(found) if found.satisfies(identity) => match Module::open_handle(path) {
                    Ok(handle) => {
                        debug!("Resolved {} to {}", identity, path.display());
                        return Some(handle);
                    }
                    Err(e) => debug!("Candidate {} is unreadable: {}", path.display(), e),
                },
                Ok(found) => trace!(
                    "Candidate {} declares {}, wanted {}",
                    path.display(),
                    found,
                    identity
                ),
                Err(e) => debug!("Candidate {} is not a module: {}", path.display(), e),
            }
        }

        None
    }
}

impl ModuleResolver for ReferenceResolver {
    fn resolve(&self, identity: &ModuleIdentity) -> Result<ModuleHandle, ResolveError> {
        for dir in &self.search_dirs {
            if let Some(handle) = self.probe_directory(dir, identity) {
                return Ok(handle);
            }
        }

        for fallback in &self.fallbacks {
            if let Some(handle) = fallback.resolve(identity) {
                debug!("Resolved {} through fallback hook", identity);
                return Ok(handle);
            }
        }

        debug!("Could not resolve {}", identity);
        Err(ResolveError::Unresolved(identity.clone()))
    }
}

/// Builder for [`ReferenceResolver`]. Directories and hooks keep insertion order.
pub struct ReferenceResolverBuilder {
    search_dirs: Vec<PathBuf>,
    extension: String,
    fallbacks: Vec<Arc<dyn FallbackResolver>>,
}

impl ReferenceResolverBuilder {
    pub fn new() -> Self {
        Self {
            search_dirs: Vec::new(),
            extension: crate::config::DEFAULT_MODULE_EXTENSION.to_string(),
            fallbacks: Vec::new(),
        }
    }

    pub fn search_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.search_dirs.push(dir.into());
        self
    }

    pub fn search_dirs(mut self, dirs: impl IntoIterator<Item = PathBuf>) -> Self {
        self.search_dirs.extend(dirs);
        self
    }

    pub fn extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Register a fallback hook. Hooks run in registration order.
    pub fn fallback(mut self, hook: impl FallbackResolver + 'static) -> Self {
        self.fallbacks.push(Arc::new(hook));
        self
    }

    pub fn fallback_arc(mut self, hook: Arc<dyn FallbackResolver>) -> Self {
        self.fallbacks.push(hook);
        self
    }

    pub fn build(self) -> ReferenceResolver {
        ReferenceResolver {
            search_dirs: self.search_dirs,
            extension: self.extension,
            fallbacks: self.fallbacks,
        }
    }
}

impl Default for ReferenceResolverBuilder {
    fn default() -> Self {
        Self::new()
    }
}
