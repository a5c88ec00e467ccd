//! Storage backends
//!
//! Three interchangeable tiers behind one async contract. The prober picks
//! exactly one per cache instance; nothing above it knows which.

pub mod errors;
pub mod key_value;
pub mod probe;
pub mod structured;
pub mod volatile;

use std::fmt;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cache::CacheEntry;

pub use errors::StorageError;
pub use key_value::KeyValueStore;
pub use probe::BackendProber;
pub use structured::StructuredStore;
pub use volatile::VolatileStore;

/// Which storage tier is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Versioned, indexed on-disk collection
    #[serde(rename = "structured")]
    DurableStructured,
    /// Flat string namespace shared with other application data
    #[serde(rename = "key-value")]
    DurableKeyValue,
    /// In-process map, lost on restart
    Volatile,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::DurableStructured => "structured",
            BackendKind::DurableKeyValue => "key-value",
            BackendKind::Volatile => "volatile",
        }
    }

    /// Whether entries survive a restart
    pub fn is_durable(&self) -> bool {
        !matches!(self, BackendKind::Volatile)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "structured" => Ok(BackendKind::DurableStructured),
            "key-value" | "keyvalue" | "kv" => Ok(BackendKind::DurableKeyValue),
            "volatile" | "memory" => Ok(BackendKind::Volatile),
            other => Err(format!("unknown storage tier '{}'", other)),
        }
    }
}

/// Predicate over stored entries, used for bulk deletion
pub type EntryPredicate<'a> = &'a (dyn Fn(&CacheEntry) -> bool + Send + Sync);

/// Contract shared by every storage tier
///
/// All variants must agree on exact key matching, overwrite on `put`, and
/// `None` from `get` for absent keys.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Tier implemented by this backend
    fn kind(&self) -> BackendKind;

    /// Store an entry, replacing any previous one under `key`
    async fn put(&self, key: &str, entry: &CacheEntry) -> Result<(), StorageError>;

    /// Fetch an entry
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StorageError>;

    /// Remove an entry; absent keys are not an error
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Remove every cache entry matching `predicate`, returning how many went
    async fn delete_where(&self, predicate: EntryPredicate<'_>) -> Result<usize, StorageError>;

    /// Remove every cache entry, leaving foreign data alone
    async fn clear(&self) -> Result<(), StorageError>;

    /// Number of cache entries
    async fn count(&self) -> Result<usize, StorageError>;

    /// Approximate bytes used by cache entries
    async fn approx_size_bytes(&self) -> Result<u64, StorageError>;
}

/// Write `data` to `path` atomically via a sibling temp file
pub(crate) fn persist_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or(Path::new("/tmp"));
    std::fs::create_dir_all(parent)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
