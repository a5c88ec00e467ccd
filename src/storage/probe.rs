//! Backend Capability Prober
//!
//! Picks exactly one storage tier, trying the configured tiers in order.
//! A tier that fails to open or probe is skipped; the volatile store is the
//! floor and always succeeds.

use std::sync::Arc;

use tracing::{info, warn};

use super::{
    BackendKind, KeyValueStore, StorageBackend, StorageError, StructuredStore, VolatileStore,
};
use crate::config::CacheConfig;

/// Factory resolving the active backend for a cache instance
pub struct BackendProber {
    config: CacheConfig,
}

impl BackendProber {
    pub fn new(config: CacheConfig) -> Self {
        Self { config }
    }

    /// Resolve the first usable tier
    pub async fn select(&self) -> Arc<dyn StorageBackend> {
        for kind in &self.config.tiers {
            match self.try_tier(*kind).await {
                Ok(backend) => {
                    info!(backend = %kind, "Selected cache storage backend");
                    return backend;
                }
                Err(e) => {
                    warn!(backend = %kind, error = %e, "Storage tier unavailable, falling through");
                }
            }
        }

        info!(backend = %BackendKind::Volatile, "Selected cache storage backend (fallback)");
        Arc::new(VolatileStore::new())
    }

    async fn try_tier(&self, kind: BackendKind) -> Result<Arc<dyn StorageBackend>, StorageError> {
        match kind {
            BackendKind::DurableStructured => {
                let store = StructuredStore::open(
                    self.config.structured_dir(),
                    self.config.schema_version,
                )
                .await?;
                Ok(Arc::new(store))
            }
            BackendKind::DurableKeyValue => {
                let store = KeyValueStore::open(
                    self.config.key_value_path(),
                    self.config.prefix.clone(),
                    self.config.quota_bytes,
                );
                store.probe().await?;
                Ok(Arc::new(store))
            }
            BackendKind::Volatile => Ok(Arc::new(VolatileStore::new())),
        }
    }
}
