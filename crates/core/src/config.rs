//! Discovery configuration.
//!
//! Built once when the engine is constructed. Values come from defaults, an optional
//! JSON file, and `METASCOPE_*` environment variables, in that order.

use crate::error::{MetascopeError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_MODULE_EXTENSION: &str = "dll";

pub const ENV_CACHE_DIR: &str = "METASCOPE_CACHE_DIR";
pub const ENV_ENABLE_CACHE: &str = "METASCOPE_ENABLE_CACHE";
pub const ENV_RUNTIME_DIR: &str = "METASCOPE_RUNTIME_DIR";
pub const ENV_PLUGIN_DIR: &str = "METASCOPE_PLUGIN_DIR";
pub const ENV_MANAGED_DIR: &str = "METASCOPE_MANAGED_DIR";
pub const ENV_MODULE_EXT: &str = "METASCOPE_MODULE_EXT";

/// Host directories searched when resolving module references.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostPaths {
    pub runtime_dir: Option<PathBuf>,
    pub plugin_dir: Option<PathBuf>,
    pub managed_dir: Option<PathBuf>,
    pub extra_dirs: Vec<PathBuf>,
}

impl HostPaths {
    /// Search directories in resolution priority order.
    pub fn search_path_list(&self) -> Vec<PathBuf> {
        self.runtime_dir
            .iter()
            .chain(self.plugin_dir.iter())
            .chain(self.managed_dir.iter())
            .chain(self.extra_dirs.iter())
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub enable_cache: bool,
    pub cache_dir: PathBuf,
    pub module_extension: String,
    pub paths: HostPaths,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enable_cache: true,
            cache_dir: default_cache_dir(),
            module_extension: DEFAULT_MODULE_EXTENSION.to_string(),
            paths: HostPaths::default(),
        }
    }
}

/// `~/.metascope/cache`, or `./.metascope/cache` when there is no home directory.
pub fn default_cache_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".metascope")
        .join("cache")
}

impl DiscoveryConfig {
    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Self {
        Self::default().with_env(|key| std::env::var(key).ok())
    }

    /// Load a JSON config file. Missing keys take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| MetascopeError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Overlay `METASCOPE_*` values returned by `lookup`. Empty values are ignored.
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(dir) = get(ENV_CACHE_DIR) {
            self.cache_dir = PathBuf::from(dir);
        }
        if let Some(flag) = get(ENV_ENABLE_CACHE) {
            self.enable_cache = !matches!(
                flag.trim().to_ascii_lowercase().as_str(),
                "0" | "false" | "no" | "off"
            );
        }
        if let Some(dir) = get(ENV_RUNTIME_DIR) {
            self.paths.runtime_dir = Some(PathBuf::from(dir));
        }
        if let Some(dir) = get(ENV_PLUGIN_DIR) {
            self.paths.plugin_dir = Some(PathBuf::from(dir));
        }
        if let Some(dir) = get(ENV_MANAGED_DIR) {
            self.paths.managed_dir = Some(PathBuf::from(dir));
        }
        if let Some(ext) = get(ENV_MODULE_EXT) {
            self.module_extension = ext.trim().trim_start_matches('.').to_string();
        }
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    pub fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.enable_cache = enabled;
        self
    }

    pub fn with_module_extension(mut self, ext: impl Into<String>) -> Self {
        self.module_extension = ext.into();
        self
    }

    pub fn with_paths(mut self, paths: HostPaths) -> Self {
        self.paths = paths;
        self
    }

    /// Whether `path` carries the module extension, compared ASCII case-insensitively.
    pub fn is_module_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(&self.module_extension))
    }
}
