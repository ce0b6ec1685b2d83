use super::{
    CACHE_EXTENSION, CACHE_FORMAT_VERSION, CacheError, CacheMap, CacheableRecord,
    FileStamp, is_valid_cache_name,
};
use crate::config::DiscoveryConfig;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheHeader {
    format: u32,
    schema: String,
    schema_version: u32,
    created_at: u64,
    entry_count: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    header: CacheHeader,
    #[serde(with = "serde_bytes")]
    payload: Vec<u8>,
}

/// Borrowing twin of [`super::CacheEntry`], so saving never clones records.
#[derive(Serialize)]
struct CacheEntryRef<'a, T> {
    items: &'a [T],
    timestamp: FileStamp,
}

/// Header information of one cache file.
#[derive(Debug, Clone, Serialize)]
pub struct CacheSummary {
    pub name: String,
    pub path: PathBuf,
    pub schema: String,
    pub schema_version: u32,
    pub entry_count: u64,
    pub size_bytes: u64,
    pub created_at: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub cache_dir: PathBuf,
    pub enabled: bool,
    pub total_caches: usize,
    pub total_entries: u64,
    pub total_bytes: u64,
}

/// Exclusive lock for one cache name, shared by every pass in this process.
#[derive(Clone)]
pub struct NameLock(Arc<Mutex<()>>);

impl NameLock {
    pub fn acquire(&self) -> MutexGuard<'_, ()> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Disk-backed store of extraction results, keyed by cache name.
pub struct AssemblyCache {
    base_dir: PathBuf,
    enabled: bool,
    locks: Mutex<HashMap<String, NameLock>>,
}

impl AssemblyCache {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            enabled: true,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &DiscoveryConfig) -> Self {
        let mut cache = Self::new(config.cache_dir.clone());
        cache.enabled = config.enable_cache;
        cache
    }

    /// A cache that never loads and never writes.
    pub fn disabled() -> Self {
        let mut cache = Self::new(PathBuf::new());
        cache.enabled = false;
        cache
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn cache_path(&self, name: &str) -> PathBuf {
        self.base_dir.join(format!("{name}.{CACHE_EXTENSION}"))
    }

    /// The lock for `name`. Entries are dropped again by [`Self::remove`] and
    /// [`Self::clear`] once no one else holds them.
    pub fn lock(&self, name: &str) -> NameLock {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(name.to_string())
            .or_insert_with(|| NameLock(Arc::new(Mutex::new(()))))
            .clone()
    }

    fn release(&self, name: &str, lock: NameLock) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the map, one in `lock`.
        if Arc::strong_count(&lock.0) <= 2 {
            locks.remove(name);
        }
    }

    /// Run `f` while holding the lock for `name`.
    pub fn with_lock<R>(&self, name: &str, f: impl FnOnce() -> R) -> R {
        let lock = self.lock(name);
        let _guard = lock.acquire();
        f()
    }

    // ---- Load ----

    /// Load the named cache. Any problem with the file degrades to `None`.
    pub fn load<T: CacheableRecord>(&self, name: &str) -> Option<CacheMap<T>> {
        if !self.enabled {
            return None;
        }
        match self.try_load(name) {
            Ok(Some(map)) => {
                debug!("Loaded cache '{}' with {} entries", name, map.len());
                Some(map)
            }
            Ok(None) => {
                debug!("No cache '{}'", name);
                None
            }
            Err(e) => {
                warn!("Ignoring cache '{}': {}. Will rebuild.", name, e);
                None
            }
        }
    }

    pub fn try_load<T: CacheableRecord>(&self, name: &str) -> Result<Option<CacheMap<T>>, CacheError> {
        if !is_valid_cache_name(name) {
            return Err(CacheError::InvalidName(name.to_string()));
        }
        let path = self.cache_path(name);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let file: CacheFile = rmp_serde::from_slice(&bytes)?;
        check_header::<T>(&file.header)?;

        let decompressed = zstd::decode_all(&file.payload[..]).map_err(CacheError::Compression)?;
        let map: CacheMap<T> = rmp_serde::from_slice(&decompressed)?;
        Ok(Some(map))
    }

    // ---- Save ----

    /// Persist `results`, stamping each module with its current modification time.
    ///
    /// Failures are logged and swallowed; a missing cache only costs a rescan.
    pub fn save<T: CacheableRecord>(&self, name: &str, results: &BTreeMap<PathBuf, Vec<T>>) {
        if !self.enabled {
            return;
        }
        match self.try_save(name, results) {
            Ok(count) => debug!("Saved cache '{}' with {} entries", name, count),
            Err(e) => warn!("Failed to save cache '{}': {}", name, e),
        }
    }

    /// Returns the number of entries written. Modules whose stamp cannot be read are
    /// left out.
    pub fn try_save<T: CacheableRecord>(
        &self,
        name: &str,
        results: &BTreeMap<PathBuf, Vec<T>>,
    ) -> Result<usize, CacheError> {
        if !is_valid_cache_name(name) {
            return Err(CacheError::InvalidName(name.to_string()));
        }

        let mut entries = BTreeMap::new();
        for (path, items) in results {
            if path.to_str().is_none() {
                debug!("Not caching {}: path is not valid UTF-8", path.display());
                continue;
            }
            match FileStamp::of(path) {
                Ok(timestamp) => {
                    entries.insert(
                        path.as_path(),
                        CacheEntryRef {
                            items: items.as_slice(),
                            timestamp,
                        },
                    );
                }
                Err(e) => debug!("Not caching {}: {}", path.display(), e),
            }
        }

        let encoded = rmp_serde::to_vec(&entries)?;
        let payload = zstd::encode_all(&encoded[..], 0)?;
        let file = CacheFile {
            header: CacheHeader {
                format: CACHE_FORMAT_VERSION,
                schema: T::SCHEMA.to_string(),
                schema_version: T::SCHEMA_VERSION,
                created_at: now_secs(),
                entry_count: entries.len() as u64,
            },
            payload,
        };
        let bytes = rmp_serde::to_vec(&file)?;

        fs::create_dir_all(&self.base_dir)?;
        let path = self.cache_path(name);
        let temp_path = self
            .base_dir
            .join(format!("{name}.{CACHE_EXTENSION}.{}.tmp", std::process::id()));
        fs::write(&temp_path, bytes)?;
        if let Err(e) = fs::rename(&temp_path, &path) {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }

        Ok(entries.len())
    }

    // ---- Management ----

    /// Summaries of every readable cache file, sorted by name.
    pub fn list(&self) -> Vec<CacheSummary> {
        let mut summaries = Vec::new();
        let Ok(dir) = fs::read_dir(&self.base_dir) else {
            return summaries;
        };

        for entry in dir.flatten() {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != CACHE_EXTENSION) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            match read_header(&path) {
                Ok((header, size_bytes)) => summaries.push(CacheSummary {
                    name,
                    path,
                    schema: header.schema,
                    schema_version: header.schema_version,
                    entry_count: header.entry_count,
                    size_bytes,
                    created_at: header.created_at,
                }),
                Err(e) => debug!("Skipping unreadable cache {}: {}", path.display(), e),
            }
        }

        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    pub fn stats(&self) -> CacheStats {
        let summaries = self.list();
        CacheStats {
            cache_dir: self.base_dir.clone(),
            enabled: self.enabled,
            total_caches: summaries.len(),
            total_entries: summaries.iter().map(|s| s.entry_count).sum(),
            total_bytes: summaries.iter().map(|s| s.size_bytes).sum(),
        }
    }

    /// Delete one cache. Returns whether a file was removed.
    pub fn remove(&self, name: &str) -> Result<bool, CacheError> {
        if !is_valid_cache_name(name) {
            return Err(CacheError::InvalidName(name.to_string()));
        }
        let lock = self.lock(name);
        let result = {
            let _guard = lock.acquire();
            fs::remove_file(self.cache_path(name))
        };
        self.release(name, lock);
        match result {
            Ok(()) => {
                info!("Removed cache '{}'", name);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete every cache file in the cache directory, along with temp files left by
    /// interrupted saves. Returns how many caches were removed.
    pub fn clear(&self) -> Result<usize, CacheError> {
        let dir = match fs::read_dir(&self.base_dir) {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        for entry in dir {
            let path = entry?.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if is_temp_file(file_name) {
                debug!("Removing leftover {}", path.display());
                remove_if_present(&path)?;
                continue;
            }
            let Some(name) = file_name.strip_suffix(&format!(".{CACHE_EXTENSION}")) else {
                continue;
            };

            let lock = self.lock(name);
            let result = {
                let _guard = lock.acquire();
                remove_if_present(&path)
            };
            self.release(name, lock);
            if result? {
                removed += 1;
            }
        }
        info!("Cleared {} caches from {}", removed, self.base_dir.display());
        Ok(removed)
    }
}

fn check_header<T: CacheableRecord>(header: &CacheHeader) -> Result<(), CacheError> {
    if header.format != CACHE_FORMAT_VERSION {
        return Err(CacheError::UnsupportedFormat(header.format));
    }
    if header.schema != T::SCHEMA || header.schema_version != T::SCHEMA_VERSION {
        return Err(CacheError::SchemaMismatch {
            expected: T::schema_tag(),
            found: format!("{}@{}", header.schema, header.schema_version),
        });
    }
    Ok(())
}

fn read_header(path: &Path) -> Result<(CacheHeader, u64), CacheError> {
    let bytes = fs::read(path)?;
    let file: CacheFile = rmp_serde::from_slice(&bytes)?;
    Ok((file.header, bytes.len() as u64))
}

/// `<name>.typecache.<pid>.tmp`, as written by `try_save`.
fn is_temp_file(file_name: &str) -> bool {
    file_name
        .strip_suffix(".tmp")
        .and_then(|rest| rest.rsplit_once('.'))
        .is_some_and(|(stem, pid)| {
            !pid.is_empty()
                && pid.bytes().all(|b| b.is_ascii_digit())
                && stem.ends_with(&format!(".{CACHE_EXTENSION}"))
        })
}

fn remove_if_present(path: &Path) -> std::io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
