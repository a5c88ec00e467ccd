//! Structured Store
//!
//! Durable, schema-versioned collection on local disk. Each entry lives in
//! its own file named after the SHA-1 of its key; an in-memory secondary index
//! orders entries by creation time.
//!
//! Layout:
//! ```text
//! <root>/schema.json          {"name": "api-cache", "version": N}
//! <root>/entries/<sha1>.json  one CacheEntry per file
//! ```

use std::collections::{BTreeSet, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{persist_atomic, BackendKind, EntryPredicate, StorageBackend, StorageError};
use crate::cache::CacheEntry;

/// Collection name recorded in the schema file
const STORE_NAME: &str = "api-cache";

const SCHEMA_FILE: &str = "schema.json";
const ENTRIES_DIR: &str = "entries";

#[derive(Debug, Serialize, Deserialize)]
struct SchemaRecord {
    name: String,
    version: u32,
}

/// Index record for one stored entry
#[derive(Debug, Clone, Copy)]
struct IndexRecord {
    created_at: u64,
    size_bytes: u64,
}

/// Primary (key) and secondary (creation time) indexes
#[derive(Debug, Default)]
struct Index {
    by_key: HashMap<String, IndexRecord>,
    by_created: BTreeSet<(u64, String)>,
}

impl Index {
    fn upsert(&mut self, key: &str, record: IndexRecord) {
        if let Some(old) = self.by_key.insert(key.to_string(), record) {
            self.by_created.remove(&(old.created_at, key.to_string()));
        }
        self.by_created.insert((record.created_at, key.to_string()));
    }

    fn remove(&mut self, key: &str) {
        if let Some(old) = self.by_key.remove(key) {
            self.by_created.remove(&(old.created_at, key.to_string()));
        }
    }

    fn clear(&mut self) {
        self.by_key.clear();
        self.by_created.clear();
    }
}

/// Versioned on-disk entry collection
pub struct StructuredStore {
    root: PathBuf,
    version: u32,
    /// Held for the duration of every operation, serializing writers
    index: Mutex<Index>,
}

impl StructuredStore {
    /// Open (creating or upgrading) the store at `root`
    ///
    /// An older on-disk schema is upgraded by dropping every entry. A newer
    /// one belongs to a newer client and fails with `SchemaMismatch`.
    pub async fn open(root: impl Into<PathBuf>, version: u32) -> Result<Self, StorageError> {
        let root = root.into();
        let entries_dir = root.join(ENTRIES_DIR);
        fs::create_dir_all(&entries_dir).await?;

        let schema_path = root.join(SCHEMA_FILE);
        match fs::read_to_string(&schema_path).await {
            Ok(text) => {
                let found: SchemaRecord = serde_json::from_str(&text).map_err(|e| {
                    StorageError::Unavailable(format!("unreadable schema file: {}", e))
                })?;
                if found.version > version {
                    return Err(StorageError::SchemaMismatch {
                        found: found.version,
                        expected: version,
                    });
                }
                if found.version < version {
                    info!(
                        from = found.version,
                        to = version,
                        "Upgrading structured store schema, dropping entries"
                    );
                    fs::remove_dir_all(&entries_dir).await?;
                    fs::create_dir_all(&entries_dir).await?;
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(root = %root.display(), "Creating structured store");
            }
            Err(e) => return Err(e.into()),
        }

        // Rewriting the schema doubles as the writability handshake
        let schema = serde_json::to_vec(&SchemaRecord {
            name: STORE_NAME.to_string(),
            version,
        })?;
        write_blocking(schema_path, schema).await?;

        let index = Self::rebuild_index(&entries_dir).await?;
        info!(
            root = %root.display(),
            version = version,
            entries = index.by_key.len(),
            "Structured store opened"
        );

        Ok(Self {
            root,
            version,
            index: Mutex::new(index),
        })
    }

    /// Schema version this store was opened with
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Keys created strictly before `cutoff`, oldest first
    pub async fn keys_created_before(&self, cutoff: u64) -> Vec<String> {
        let index = self.index.lock().await;
        index
            .by_created
            .iter()
            .take_while(|(created_at, _)| *created_at < cutoff)
            .map(|(_, key)| key.clone())
            .collect()
    }

    /// Scan entry files, dropping any that don't decode
    async fn rebuild_index(entries_dir: &Path) -> Result<Index, StorageError> {
        let mut index = Index::default();
        let mut read_dir = fs::read_dir(entries_dir).await?;

        while let Some(dir_entry) = read_dir.next_entry().await? {
            let path = dir_entry.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            let text = match fs::read_to_string(&path).await {
                Ok(text) => text,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Removing unreadable entry file");
                    remove_stray(&path).await;
                    continue;
                }
            };
            match serde_json::from_str::<CacheEntry>(&text) {
                Ok(entry) => index.upsert(
                    &entry.key,
                    IndexRecord {
                        created_at: entry.created_at,
                        size_bytes: text.len() as u64,
                    },
                ),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Removing undecodable entry file");
                    remove_stray(&path).await;
                }
            }
        }

        Ok(index)
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let digest = Sha1::digest(key.as_bytes());
        self.root
            .join(ENTRIES_DIR)
            .join(format!("{:x}.json", digest))
    }

    async fn load(&self, key: &str) -> Result<Option<CacheEntry>, StorageError> {
        let text = match fs::read_to_string(self.entry_path(key)).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let entry = CacheEntry::from_json(key, &text)?;
        // Digest collision or a file written under another key
        if entry.key != key {
            return Ok(None);
        }
        Ok(Some(entry))
    }

    async fn remove_file(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.entry_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

async fn remove_stray(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        warn!(path = %path.display(), error = %e, "Failed to remove entry file");
    }
}

async fn write_blocking(path: PathBuf, data: Vec<u8>) -> Result<(), StorageError> {
    tokio::task::spawn_blocking(move || persist_atomic(&path, &data))
        .await
        .map_err(StorageError::from_join)??;
    Ok(())
}

#[async_trait]
impl StorageBackend for StructuredStore {
    fn kind(&self) -> BackendKind {
        BackendKind::DurableStructured
    }

    async fn put(&self, key: &str, entry: &CacheEntry) -> Result<(), StorageError> {
        let text = entry.to_json()?;
        let record = IndexRecord {
            created_at: entry.created_at,
            size_bytes: text.len() as u64,
        };

        let mut index = self.index.lock().await;
        write_blocking(self.entry_path(key), text.into_bytes()).await?;
        index.upsert(key, record);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StorageError> {
        let mut index = self.index.lock().await;
        let loaded = self.load(key).await?;
        if loaded.is_none() && index.by_key.contains_key(key) {
            debug!(key = %key, "Dropping stale index record");
            index.remove(key);
        }
        Ok(loaded)
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut index = self.index.lock().await;
        self.remove_file(key).await?;
        index.remove(key);
        Ok(())
    }

    async fn delete_where(&self, predicate: EntryPredicate<'_>) -> Result<usize, StorageError> {
        let mut index = self.index.lock().await;
        let keys: Vec<String> = index.by_key.keys().cloned().collect();

        let mut removed = 0;
        for key in keys {
            let matches = match self.load(&key).await {
                Ok(Some(entry)) => predicate(&entry),
                Ok(None) => {
                    index.remove(&key);
                    false
                }
                Err(StorageError::Corrupt { .. }) => true,
                Err(e) => return Err(e),
            };
            if matches {
                self.remove_file(&key).await?;
                index.remove(&key);
                removed += 1;
            }
        }
        debug!(removed = removed, "Structured store bulk delete");
        Ok(removed)
    }

    async fn clear(&self) -> Result<(), StorageError> {
        let mut index = self.index.lock().await;
        let entries_dir = self.root.join(ENTRIES_DIR);
        match fs::remove_dir_all(&entries_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        fs::create_dir_all(&entries_dir).await?;
        index.clear();
        Ok(())
    }

    async fn count(&self) -> Result<usize, StorageError> {
        Ok(self.index.lock().await.by_key.len())
    }

    async fn approx_size_bytes(&self) -> Result<u64, StorageError> {
        let index = self.index.lock().await;
        Ok(index
            .by_key
            .iter()
            .map(|(key, record)| key.len() as u64 + record.size_bytes)
            .sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn entry(key: &str, created_at: u64) -> CacheEntry {
        CacheEntry::new(key, json!({"key": key}), created_at)
    }

    #[tokio::test]
    async fn test_put_get_overwrite_delete() {
        let dir = TempDir::new().unwrap();
        let store = StructuredStore::open(dir.path(), 1).await.unwrap();

        assert!(store.get("a").await.unwrap().is_none());
        store.put("a", &entry("a", 10)).await.unwrap();
        assert_eq!(store.get("a").await.unwrap().unwrap().created_at, 10);

        store.put("a", &entry("a", 20)).await.unwrap();
        assert_eq!(store.get("a").await.unwrap().unwrap().created_at, 20);
        assert_eq!(store.count().await.unwrap(), 1);

        store.delete("a").await.unwrap();
        store.delete("a").await.unwrap();
        assert!(store.get("a").await.unwrap().is_none());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = StructuredStore::open(dir.path(), 1).await.unwrap();
            store.put("a", &entry("a", 1)).await.unwrap();
            store.put("b", &entry("b", 2)).await.unwrap();
        }

        let store = StructuredStore::open(dir.path(), 1).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
        assert_eq!(
            store.get("b").await.unwrap().unwrap().payload,
            json!({"key": "b"})
        );
        assert!(store.approx_size_bytes().await.unwrap() > 0);
    }

    #[tokio::test]
    async fn test_schema_upgrade_drops_entries() {
        let dir = TempDir::new().unwrap();
        {
            let store = StructuredStore::open(dir.path(), 1).await.unwrap();
            store.put("a", &entry("a", 1)).await.unwrap();
        }

        let store = StructuredStore::open(dir.path(), 2).await.unwrap();
        assert_eq!(store.version(), 2);
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(store.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_newer_schema_is_rejected() {
        let dir = TempDir::new().unwrap();
        StructuredStore::open(dir.path(), 3).await.unwrap();

        let err = StructuredStore::open(dir.path(), 2).await.err().unwrap();
        assert!(matches!(
            err,
            StorageError::SchemaMismatch {
                found: 3,
                expected: 2
            }
        ));
    }

    #[tokio::test]
    async fn test_open_fails_when_root_is_a_file() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("structured");
        std::fs::write(&root, b"not a directory").unwrap();

        assert!(StructuredStore::open(&root, 1).await.is_err());
    }

    #[tokio::test]
    async fn test_creation_time_index() {
        let dir = TempDir::new().unwrap();
        let store = StructuredStore::open(dir.path(), 1).await.unwrap();
        store.put("late", &entry("late", 300)).await.unwrap();
        store.put("early", &entry("early", 100)).await.unwrap();
        store.put("mid", &entry("mid", 200)).await.unwrap();

        assert_eq!(store.keys_created_before(250).await, vec!["early", "mid"]);

        // Overwriting moves the key in the index
        store.put("early", &entry("early", 400)).await.unwrap();
        assert_eq!(store.keys_created_before(250).await, vec!["mid"]);
    }

    #[tokio::test]
    async fn test_delete_where_and_corrupt_files() {
        let dir = TempDir::new().unwrap();
        let store = StructuredStore::open(dir.path(), 1).await.unwrap();
        store.put("keep", &entry("keep", 1)).await.unwrap();
        store.put("drop", &entry("drop", 2)).await.unwrap();
        store.put("broken", &entry("broken", 3)).await.unwrap();
        std::fs::write(store.entry_path("broken"), b"{oops").unwrap();

        assert!(matches!(
            store.get("broken").await,
            Err(StorageError::Corrupt { .. })
        ));

        let removed = store
            .delete_where(&|e: &CacheEntry| e.key == "drop")
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.count().await.unwrap(), 1);
        assert!(store.get("keep").await.unwrap().is_some());

        store.clear().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(store.get("keep").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unreadable_entry_file_does_not_block_open() {
        let dir = TempDir::new().unwrap();
        {
            let store = StructuredStore::open(dir.path(), 1).await.unwrap();
            store.put("a", &entry("a", 1)).await.unwrap();
        }
        let junk = dir.path().join(ENTRIES_DIR).join("junk.json");
        std::fs::write(&junk, [0xff, 0xfe, 0x00]).unwrap();

        let store = StructuredStore::open(dir.path(), 1).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
        assert!(store.get("a").await.unwrap().is_some());
        assert!(!junk.exists());
    }

    #[tokio::test]
    async fn test_mismatched_file_drops_index_record() {
        let dir = TempDir::new().unwrap();
        let store = StructuredStore::open(dir.path(), 1).await.unwrap();
        store.put("a", &entry("a", 1)).await.unwrap();
        std::fs::write(store.entry_path("a"), entry("b", 1).to_json().unwrap()).unwrap();

        assert!(store.get("a").await.unwrap().is_none());
        assert_eq!(store.count().await.unwrap(), 0);
        assert_eq!(store.approx_size_bytes().await.unwrap(), 0);
    }
}
