//! Persistent per-module extraction cache.
//!
//! One file per cache name holds every module inspected during the last pass that
//! used that name, each paired with the module's modification stamp at save time.

mod store;

pub use store::{AssemblyCache, CacheStats, CacheSummary, NameLock};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Version of the on-disk container layout.
pub const CACHE_FORMAT_VERSION: u32 = 1;

/// Extension of cache files inside the cache directory.
pub const CACHE_EXTENSION: &str = "typecache";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("cache decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("cache payload is not valid zstd: {0}")]
    Compression(std::io::Error),
    #[error("cache schema mismatch: expected {expected}, found {found}")]
    SchemaMismatch { expected: String, found: String },
    #[error("unsupported cache format {0}")]
    UnsupportedFormat(u32),
    #[error("invalid cache name {0:?}")]
    InvalidName(String),
}

/// Record types that may be persisted.
///
/// `SCHEMA` names the record layout; bump `SCHEMA_VERSION` whenever the serialized
/// shape changes so stale caches are discarded instead of misread.
pub trait CacheableRecord: Serialize + DeserializeOwned {
    const SCHEMA: &'static str;
    const SCHEMA_VERSION: u32 = 1;

    fn schema_tag() -> String {
        format!("{}@{}", Self::SCHEMA, Self::SCHEMA_VERSION)
    }
}

/// Modification time of a file, to nanosecond precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileStamp {
    pub secs: u64,
    pub nanos: u32,
}

impl FileStamp {
    /// Fails when the time cannot be read or lies before the Unix epoch.
    pub fn of(path: &Path) -> std::io::Result<Self> {
        let modified = std::fs::metadata(path)?.modified()?;
        Self::from_system_time(modified).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "modification time is before the Unix epoch",
            )
        })
    }

    pub fn from_system_time(time: SystemTime) -> Option<Self> {
        let since = time.duration_since(UNIX_EPOCH).ok()?;
        Some(Self {
            secs: since.as_secs(),
            nanos: since.subsec_nanos(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub items: Vec<T>,
    pub timestamp: FileStamp,
}

impl<T> CacheEntry<T> {
    /// Whether this entry still describes the file as it is now.
    pub fn is_fresh(&self, current: FileStamp) -> bool {
        self.timestamp == current
    }
}

pub type CacheMap<T> = BTreeMap<PathBuf, CacheEntry<T>>;

/// Cache names map straight onto file names.
pub fn is_valid_cache_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_cache_names() {
        assert!(is_valid_cache_name("plugins"));
        assert!(is_valid_cache_name("host.v2-main_1"));
        assert!(!is_valid_cache_name(""));
        assert!(!is_valid_cache_name(".."));
        assert!(!is_valid_cache_name("../escape"));
        assert!(!is_valid_cache_name("with space"));
    }

    #[test]
    fn test_stamp_keeps_nanoseconds() {
        let t = UNIX_EPOCH + Duration::new(1_700_000_000, 123_456_789);
        let stamp = FileStamp::from_system_time(t).unwrap();
        assert_eq!(stamp.secs, 1_700_000_000);
        assert_eq!(stamp.nanos, 123_456_789);

        let entry = CacheEntry::<u8> {
            items: vec![],
            timestamp: stamp,
        };
        assert!(entry.is_fresh(stamp));
        assert!(!entry.is_fresh(FileStamp::from_system_time(t + Duration::from_nanos(1)).unwrap()));
    }

    #[test]
    fn test_pre_epoch_time_is_unstampable() {
        assert!(FileStamp::from_system_time(UNIX_EPOCH - Duration::from_secs(10)).is_none());
        assert!(FileStamp::from_system_time(UNIX_EPOCH - Duration::from_secs(20)).is_none());
        assert!(FileStamp::from_system_time(UNIX_EPOCH).is_some());
    }

    #[test]
    fn test_pre_epoch_file_is_not_stamped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Old.dll");
        std::fs::write(&path, b"module").unwrap();
        let old = UNIX_EPOCH - Duration::from_secs(86_400);
        let set = std::fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(old);
        // Some filesystems cannot represent pre-epoch times.
        if set.is_ok() && std::fs::metadata(&path).unwrap().modified().unwrap() == old {
            let err = FileStamp::of(&path).unwrap_err();
            assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
        }
    }
}
