//! Volatile Store
//!
//! In-process storage backed by Moka. No TTL or capacity is configured on the
//! Moka side: expiry stays lazy and is decided by the cache manager.

use async_trait::async_trait;
use moka::sync::Cache;
use tracing::debug;

use super::{BackendKind, EntryPredicate, StorageBackend, StorageError};
use crate::cache::CacheEntry;

/// In-memory entry map living as long as the process
pub struct VolatileStore {
    entries: Cache<String, CacheEntry>,
}

impl VolatileStore {
    pub fn new() -> Self {
        let entries = Cache::builder().name("api_response_cache").build();
        Self { entries }
    }
}

impl Default for VolatileStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for VolatileStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Volatile
    }

    async fn put(&self, key: &str, entry: &CacheEntry) -> Result<(), StorageError> {
        self.entries.insert(key.to_string(), entry.clone());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StorageError> {
        Ok(self.entries.get(key))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.entries.invalidate(key);
        Ok(())
    }

    async fn delete_where(&self, predicate: EntryPredicate<'_>) -> Result<usize, StorageError> {
        let doomed: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| predicate(entry))
            .map(|(key, _)| (*key).clone())
            .collect();

        for key in &doomed {
            self.entries.invalidate(key);
        }
        debug!(removed = doomed.len(), "Volatile store bulk delete");
        Ok(doomed.len())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        // invalidate() removes immediately; invalidate_all() waits for maintenance
        let keys: Vec<String> = self.entries.iter().map(|(key, _)| (*key).clone()).collect();
        for key in &keys {
            self.entries.invalidate(key);
        }
        self.entries.run_pending_tasks();
        Ok(())
    }

    async fn count(&self) -> Result<usize, StorageError> {
        // entry_count() lags behind pending maintenance; iterate for an exact figure
        Ok(self.entries.iter().count())
    }

    async fn approx_size_bytes(&self) -> Result<u64, StorageError> {
        Ok(self
            .entries
            .iter()
            .map(|(key, entry)| key.len() as u64 + entry.approx_size_bytes())
            .sum())
    }
}
