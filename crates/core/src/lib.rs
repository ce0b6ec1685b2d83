//! Module-metadata discovery and caching.
//!
//! Locates module files under a directory, reads their type tables structurally
//! (nothing inside a module is ever executed), runs a caller-supplied selector over
//! each top-level type, and caches the selected records per module keyed by the
//! module's modification time.

pub mod cache;
pub mod config;
pub mod discovery;
pub mod error;
pub mod extractor;
pub mod filters;
pub mod logging;
pub mod module;
pub mod resolver;

pub use cache::{AssemblyCache, CacheEntry, CacheError, CacheableRecord, FileStamp};
pub use config::{DiscoveryConfig, HostPaths};
pub use discovery::{ScanOutcome, ScanReport, TypeDiscovery, TypeDiscoveryBuilder, TypeMap};
pub use error::{MetascopeError, Result};
pub use extractor::{ExtractError, Extraction, MetadataExtractor};
pub use module::{Module, ModuleHandle, ResolvedType, TypeDefinition};
pub use resolver::{
    CachingResolver, FallbackResolver, ModuleResolver, NullResolver, ReferenceResolver,
    ResolveError,
};

pub use metascope_image as image;
