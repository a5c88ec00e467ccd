//! Key-Value Store
//!
//! Durable flat string namespace in a single JSON object file, shared with
//! other application data (session tokens, preferences). Only keys carrying
//! the cache prefix are ever enumerated or bulk-deleted.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{persist_atomic, BackendKind, EntryPredicate, StorageBackend, StorageError};
use crate::cache::CacheEntry;

/// Throwaway key used by the functional probe
const PROBE_KEY: &str = "__api_cache_probe__";

type Namespace = BTreeMap<String, String>;

/// Shared flat namespace backed by one file
pub struct KeyValueStore {
    path: PathBuf,
    prefix: String,
    quota_bytes: u64,
    /// Serializes read-modify-write cycles within the process
    lock: Mutex<()>,
}

impl KeyValueStore {
    /// Bind to the namespace file at `path`; nothing is touched until first use
    pub fn open(path: impl Into<PathBuf>, prefix: impl Into<String>, quota_bytes: u64) -> Self {
        Self {
            path: path.into(),
            prefix: prefix.into(),
            quota_bytes,
            lock: Mutex::new(()),
        }
    }

    /// Namespace file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a throwaway key, read it back and delete it
    pub async fn probe(&self) -> Result<(), StorageError> {
        let value = "1".to_string();
        self.set_item(PROBE_KEY, value.clone()).await?;
        let read_back = self.get_item(PROBE_KEY).await?;
        self.remove_item(PROBE_KEY).await?;

        if read_back.as_ref() != Some(&value) {
            return Err(StorageError::Unavailable(
                "probe value did not read back".to_string(),
            ));
        }
        info!(path = %self.path.display(), "Key-value store probe succeeded");
        Ok(())
    }

    /// Raw string read of any key, cache-owned or not
    pub async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = self.lock.lock().await;
        let namespace = self.load().await?;
        Ok(namespace.get(key).cloned())
    }

    /// Raw string write of any key
    pub async fn set_item(&self, key: &str, value: String) -> Result<(), StorageError> {
        let _guard = self.lock.lock().await;
        let mut namespace = self.load().await?;
        namespace.insert(key.to_string(), value);
        self.save(&namespace).await
    }

    /// Raw delete of any key
    pub async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock().await;
        let mut namespace = self.load().await?;
        if namespace.remove(key).is_some() {
            self.save(&namespace).await?;
        }
        Ok(())
    }

    async fn load(&self) -> Result<Namespace, StorageError> {
        match fs::read_to_string(&self.path).await {
            Ok(text) if text.trim().is_empty() => Ok(Namespace::new()),
            Ok(text) => serde_json::from_str(&text).map_err(|e| {
                StorageError::Unavailable(format!("namespace file is not a string map: {}", e))
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Namespace::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, namespace: &Namespace) -> Result<(), StorageError> {
        let needed: u64 = namespace
            .iter()
            .map(|(k, v)| (k.len() + v.len()) as u64)
            .sum();
        if needed > self.quota_bytes {
            return Err(StorageError::QuotaExceeded {
                needed,
                quota: self.quota_bytes,
            });
        }

        let data = serde_json::to_vec(namespace)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || persist_atomic(&path, &data))
            .await
            .map_err(StorageError::from_join)??;
        Ok(())
    }

    fn owns(&self, key: &str) -> bool {
        key.starts_with(&self.prefix)
    }
}

#[async_trait]
impl StorageBackend for KeyValueStore {
    fn kind(&self) -> BackendKind {
        BackendKind::DurableKeyValue
    }

    async fn put(&self, key: &str, entry: &CacheEntry) -> Result<(), StorageError> {
        self.set_item(key, entry.to_json()?).await
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StorageError> {
        match self.get_item(key).await? {
            Some(text) => Ok(Some(CacheEntry::from_json(key, &text)?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.remove_item(key).await
    }

    async fn delete_where(&self, predicate: EntryPredicate<'_>) -> Result<usize, StorageError> {
        let _guard = self.lock.lock().await;
        let mut namespace = self.load().await?;
        let before = namespace.len();

        namespace.retain(|key, text| {
            if !key.starts_with(&self.prefix) {
                return true;
            }
            match CacheEntry::from_json(key, text) {
                Ok(entry) => !predicate(&entry),
                // Undecodable cache values are dropped along with the matches
                Err(_) => false,
            }
        });

        let removed = before - namespace.len();
        if removed > 0 {
            self.save(&namespace).await?;
        }
        debug!(removed = removed, "Key-value store bulk delete");
        Ok(removed)
    }

    async fn clear(&self) -> Result<(), StorageError> {
        let _guard = self.lock.lock().await;
        let mut namespace = self.load().await?;
        let before = namespace.len();
        namespace.retain(|key, _| !key.starts_with(&self.prefix));
        if namespace.len() != before {
            self.save(&namespace).await?;
        }
        Ok(())
    }

    async fn count(&self) -> Result<usize, StorageError> {
        let _guard = self.lock.lock().await;
        let namespace = self.load().await?;
        Ok(namespace.keys().filter(|k| self.owns(k)).count())
    }

    async fn approx_size_bytes(&self) -> Result<u64, StorageError> {
        let _guard = self.lock.lock().await;
        let namespace = self.load().await?;
        Ok(namespace
            .iter()
            .filter(|(k, _)| self.owns(k))
            .map(|(k, v)| (k.len() + v.len()) as u64)
            .sum())
    }
}
