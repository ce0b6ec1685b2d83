//! Directory-level type discovery.
//!
//! A pass walks a directory tree for module files, reuses cached results for modules
//! whose modification stamp is unchanged, extracts the rest, and rewrites the cache
//! with exactly the set of modules inspected during the pass.

use crate::cache::{AssemblyCache, CacheMap, CacheableRecord, FileStamp};
use crate::config::DiscoveryConfig;
use crate::error::{MetascopeError, Result};
use crate::extractor::{Extraction, MetadataExtractor};
use crate::module::{Module, TypeDefinition};
use crate::resolver::{CachingResolver, FallbackResolver, ModuleResolver, ReferenceResolver};
use serde::Serialize;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Module path to the records selected from it. Only non-empty results appear.
pub type TypeMap<T> = BTreeMap<PathBuf, Vec<T>>;

/// Counters for one discovery pass.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    /// Module files found under the root
    pub candidates: usize,
    /// Modules answered from the cache without being opened
    pub cache_hits: usize,
    /// Modules opened and run through the selector
    pub extracted: usize,
    /// Modules rejected by the module-level filter
    pub filtered: usize,
    /// Modules skipped because of an error or a panic
    pub failed: usize,
    /// Entries in the returned mapping
    pub modules_with_types: usize,
    /// Total records across all entries
    pub records: usize,
    pub duration: Duration,
}

#[derive(Debug, Clone)]
pub struct ScanOutcome<T> {
    pub types: TypeMap<T>,
    pub report: ScanReport,
}

/// Entry point for discovery passes.
pub struct TypeDiscovery {
    config: DiscoveryConfig,
    resolver: Arc<dyn ModuleResolver>,
    cache: AssemblyCache,
}

impl TypeDiscovery {
    /// Engine with the resolver and cache described by `config`.
    pub fn new(config: DiscoveryConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: DiscoveryConfig) -> TypeDiscoveryBuilder {
        TypeDiscoveryBuilder::new(config)
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    pub fn resolver(&self) -> &Arc<dyn ModuleResolver> {
        &self.resolver
    }

    pub fn cache(&self) -> &AssemblyCache {
        &self.cache
    }

    /// Discover types under `dir` without touching the cache.
    pub fn find_types<T, S>(
        &self,
        dir: &Path,
        selector: S,
        filter: Option<&dyn Fn(&Module) -> bool>,
    ) -> Result<TypeMap<T>>
    where
        S: Fn(&TypeDefinition<'_>) -> Option<T>,
    {
        self.scan(dir, selector, filter).map(|o| o.types)
    }

    /// Discover types under `dir`, reusing and then rewriting the cache named `cache_name`.
    pub fn find_types_cached<T, S>(
        &self,
        dir: &Path,
        selector: S,
        filter: Option<&dyn Fn(&Module) -> bool>,
        cache_name: &str,
    ) -> Result<TypeMap<T>>
    where
        T: CacheableRecord,
        S: Fn(&TypeDefinition<'_>) -> Option<T>,
    {
        self.scan_cached(dir, selector, filter, cache_name)
            .map(|o| o.types)
    }

    pub fn scan<T, S>(
        &self,
        dir: &Path,
        selector: S,
        filter: Option<&dyn Fn(&Module) -> bool>,
    ) -> Result<ScanOutcome<T>>
    where
        S: Fn(&TypeDefinition<'_>) -> Option<T>,
    {
        let start = Instant::now();
        let (inspected, report) = self.pass(dir, &selector, filter, None)?;
        Ok(finish(inspected, report, start))
    }

    pub fn scan_cached<T, S>(
        &self,
        dir: &Path,
        selector: S,
        filter: Option<&dyn Fn(&Module) -> bool>,
        cache_name: &str,
    ) -> Result<ScanOutcome<T>>
    where
        T: CacheableRecord,
        S: Fn(&TypeDefinition<'_>) -> Option<T>,
    {
        let start = Instant::now();
        let lock = self.cache.lock(cache_name);
        let _guard = lock.acquire();

        let previous = self.cache.load::<T>(cache_name);
        let (inspected, report) = self.pass(dir, &selector, filter, previous)?;
        self.cache.save(cache_name, &inspected);

        Ok(finish(inspected, report, start))
    }

    /// Inspect every candidate once. The returned map holds every module inspected
    /// successfully, including empty and filtered ones.
    fn pass<T, S>(
        &self,
        dir: &Path,
        selector: &S,
        filter: Option<&dyn Fn(&Module) -> bool>,
        mut previous: Option<CacheMap<T>>,
    ) -> Result<(BTreeMap<PathBuf, Vec<T>>, ScanReport)>
    where
        S: Fn(&TypeDefinition<'_>) -> Option<T>,
    {
        let root = open_root(dir)?;
        let candidates = self.candidates(&root);

        let mut report = ScanReport {
            candidates: candidates.len(),
            ..ScanReport::default()
        };
        let mut inspected = BTreeMap::new();

        let resolver = CachingResolver::new(self.resolver.clone());
        let extractor = MetadataExtractor::new(&resolver);

        for path in candidates {
            if let Some(cached) = previous.as_mut() {
                match (cached.remove(&path), FileStamp::of(&path)) {
                    (Some(entry), Ok(stamp)) if entry.is_fresh(stamp) => {
                        debug!("Cache hit for {}", path.display());
                        report.cache_hits += 1;
                        inspected.insert(path, entry.items);
                        continue;
                    }
                    (_, Err(e)) => debug!("Bypassing cache for {}: {}", path.display(), e),
                    (Some(_), Ok(_)) => debug!("Stale cache entry for {}", path.display()),
                    (None, Ok(_)) => debug!("Cache miss for {}", path.display()),
                }
            }

            let outcome = catch_unwind(AssertUnwindSafe(|| {
                extractor.try_extract(&path, selector, filter)
            }));
            match outcome {
                Ok(Ok(Extraction::Filtered)) => {
                    report.filtered += 1;
                    inspected.insert(path, Vec::new());
                }
                Ok(Ok(Extraction::Selected(items))) => {
                    report.extracted += 1;
                    inspected.insert(path, items);
                }
                Ok(Err(e)) => {
                    warn!("Skipping {}", e);
                    report.failed += 1;
                }
                Err(panic) => {
                    warn!(
                        "Skipping {}: inspection panicked: {}",
                        path.display(),
                        panic_message(panic.as_ref())
                    );
                    report.failed += 1;
                }
            }
        }

        debug!("Resolved {} distinct references during pass", resolver.len());
        Ok((inspected, report))
    }

    /// Module files under `root`, sorted by path. Unreadable subdirectories are skipped.
    fn candidates(&self, root: &Path) -> Vec<PathBuf> {
        let mut found = Vec::new();
        for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
            match entry {
                Ok(entry) => {
                    if entry.file_type().is_file() && self.config.is_module_file(entry.path()) {
                        found.push(entry.into_path());
                    }
                }
                Err(e) => warn!("Skipping part of {}: {}", root.display(), e),
            }
        }
        found.sort();
        found
    }
}

fn open_root(dir: &Path) -> Result<PathBuf> {
    let root = dir.canonicalize().map_err(|source| MetascopeError::Directory {
        path: dir.to_path_buf(),
        source,
    })?;
    if !root.is_dir() {
        return Err(MetascopeError::NotADirectory(root));
    }
    std::fs::read_dir(&root).map_err(|source| MetascopeError::Directory {
        path: root.clone(),
        source,
    })?;
    Ok(root)
}

fn finish<T>(
    inspected: BTreeMap<PathBuf, Vec<T>>,
    mut report: ScanReport,
    start: Instant,
) -> ScanOutcome<T> {
    let types: TypeMap<T> = inspected
        .into_iter()
        .filter(|(_, items)| !items.is_empty())
        .collect();

    report.modules_with_types = types.len();
    report.records = types.values().map(Vec::len).sum();
    report.duration = start.elapsed();

    info!(
        "Discovery complete: {} candidates, {} cached, {} extracted, {} filtered, {} failed, {} records in {:?}",
        report.candidates,
        report.cache_hits,
        report.extracted,
        report.filtered,
        report.failed,
        report.records,
        report.duration
    );

    ScanOutcome { types, report }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

/// Builder for [`TypeDiscovery`].
pub struct TypeDiscoveryBuilder {
    config: DiscoveryConfig,
    resolver: Option<Arc<dyn ModuleResolver>>,
    fallbacks: Vec<Arc<dyn FallbackResolver>>,
    cache: Option<AssemblyCache>,
}

impl TypeDiscoveryBuilder {
    pub fn new(config: DiscoveryConfig) -> Self {
        Self {
            config,
            resolver: None,
            fallbacks: Vec::new(),
            cache: None,
        }
    }

    /// Register a fallback hook on the default resolver.
    pub fn fallback(mut self, hook: impl FallbackResolver + 'static) -> Self {
        self.fallbacks.push(Arc::new(hook));
        self
    }

    /// Replace the default search-path resolver. Registered fallbacks are ignored.
    pub fn resolver(mut self, resolver: Arc<dyn ModuleResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn cache(mut self, cache: AssemblyCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn build(self) -> TypeDiscovery {
        let resolver = match self.resolver {
            Some(resolver) => resolver,
            None => {
                let builder = self
                    .fallbacks
                    .into_iter()
                    .fold(ReferenceResolver::builder_from_config(&self.config), |b, hook| {
                        b.fallback_arc(hook)
                    });
                Arc::new(builder.build())
            }
        };
        let cache = self
            .cache
            .unwrap_or_else(|| AssemblyCache::from_config(&self.config));

        TypeDiscovery {
            config: self.config,
            resolver,
            cache,
        }
    }
}
