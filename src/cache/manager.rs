//! Cache Manager
//!
//! The only entry point callers use. Owns backend selection (resolved once
//! behind an async barrier), key derivation, and expiration. Every failure
//! below it is logged and turned into a miss or a no-op: a broken cache
//! behaves exactly like an empty one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{debug, trace, warn};

use super::entry::CacheEntry;
use super::key::{user_scope_of, KeyCodec, Params};
use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;
use crate::storage::{BackendKind, BackendProber, StorageBackend, StorageError};

/// Options for [`CacheManager::read`]
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// Maximum acceptable age, the configured default when unset; the stored
    /// TTL still applies if it is shorter
    pub ttl: Option<Duration>,
    /// Skip the cache entirely; the caller wants a fresh fetch
    pub force_refresh: bool,
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_ttl_minutes(self, minutes: u64) -> Self {
        self.with_ttl(Duration::from_secs(minutes.saturating_mul(60)))
    }

    pub fn with_force_refresh(mut self, force_refresh: bool) -> Self {
        self.force_refresh = force_refresh;
        self
    }
}

/// Options for [`CacheManager::write`]
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Entry lifetime; the configured default when unset
    pub ttl: Option<Duration>,
    /// Owner tag; derived from a `/users/{id}` endpoint when unset
    pub scope: Option<String>,
}

impl WriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_ttl_minutes(self, minutes: u64) -> Self {
        self.with_ttl(Duration::from_secs(minutes.saturating_mul(60)))
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }
}

/// Snapshot of cache state
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub count: usize,
    pub approx_size_bytes: u64,
    pub backend_kind: BackendKind,
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    /// Hit rate in percent; zero before any lookup
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total > 0 {
            (self.hits as f64 / total as f64) * 100.0
        } else {
            0.0
        }
    }
}

/// API response cache over one lazily selected storage tier
pub struct CacheManager {
    config: CacheConfig,
    codec: KeyCodec,
    clock: Arc<dyn Clock>,
    /// Set once by the first caller; everyone else awaits the same probe
    backend: OnceCell<Arc<dyn StorageBackend>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheManager {
    /// Create a manager; no I/O happens until first use or [`initialize`](Self::initialize)
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a manager with a custom time source
    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        let codec = KeyCodec::new(config.prefix.clone());
        Self {
            config,
            codec,
            clock,
            backend: OnceCell::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Run backend selection now instead of on first use
    pub async fn initialize(&self) -> BackendKind {
        self.backend().await.kind()
    }

    /// Selected tier, if selection has already happened
    pub fn backend_kind(&self) -> Option<BackendKind> {
        self.backend.get().map(|b| b.kind())
    }

    /// Configuration in use
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Key an endpoint call is stored under
    pub fn key_for(&self, endpoint: &str, params: &Params) -> String {
        self.codec.encode(endpoint, params)
    }

    async fn backend(&self) -> &Arc<dyn StorageBackend> {
        self.backend
            .get_or_init(|| async { BackendProber::new(self.config.clone()).select().await })
            .await
    }

    /// Look up a cached response
    ///
    /// Returns `None` on a miss, on expiry (the entry is deleted), when
    /// `force_refresh` is set, or when anything goes wrong underneath.
    /// Without an explicit read TTL the configured default applies, still
    /// capped by the TTL stored with the entry.
    pub async fn read<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &Params,
        options: ReadOptions,
    ) -> Option<T> {
        if options.force_refresh {
            trace!(endpoint = endpoint, "Cache bypassed (force refresh)");
            return None;
        }

        let key = self.codec.encode(endpoint, params);
        let backend = self.backend().await;

        let entry = match backend.get(&key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                self.record_miss(&key);
                return None;
            }
            Err(e @ StorageError::Corrupt { .. }) => {
                warn!(key = %key, error = %e, "Dropping corrupt cache entry");
                self.delete_quietly(backend, &key).await;
                self.record_miss(&key);
                return None;
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cache read failed");
                self.record_miss(&key);
                return None;
            }
        };

        let now = self.clock.now_millis();
        // Reads without a TTL still cap freshness at the configured default
        let read_ttl = options.ttl.unwrap_or(self.config.default_ttl);
        let ttl_ms = entry.effective_ttl_ms(Some(read_ttl), self.config.default_ttl);
        if entry.is_expired(now, ttl_ms) {
            debug!(
                key = %key,
                age_ms = entry.age_ms(now),
                ttl_ms = ttl_ms,
                "Cache entry expired"
            );
            self.delete_quietly(backend, &key).await;
            self.record_miss(&key);
            return None;
        }

        match serde_json::from_value(entry.payload) {
            Ok(payload) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                trace!(key = %key, "Cache HIT");
                Some(payload)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cached payload does not match requested type");
                self.record_miss(&key);
                None
            }
        }
    }

    /// Store a response
    pub async fn write<T: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        params: &Params,
        payload: &T,
        options: WriteOptions,
    ) {
        let key = self.codec.encode(endpoint, params);
        let payload = match serde_json::to_value(payload) {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %key, error = %e, "Payload is not serializable, not caching");
                return;
            }
        };

        let ttl = options.ttl.unwrap_or(self.config.default_ttl);
        let scope = options.scope.or_else(|| user_scope_of(endpoint));
        let entry = CacheEntry::new(key.clone(), payload, self.clock.now_millis())
            .with_ttl(ttl)
            .with_scope(scope);

        let backend = self.backend().await;
        match backend.put(&key, &entry).await {
            Ok(()) => debug!(key = %key, ttl_secs = ttl.as_secs(), "Cached response"),
            Err(e) => warn!(key = %key, error = %e, "Cache write failed"),
        }
    }

    /// Drop the entry for one endpoint call; absent entries are fine
    pub async fn invalidate(&self, endpoint: &str, params: &Params) {
        let key = self.codec.encode(endpoint, params);
        let backend = self.backend().await;
        match backend.delete(&key).await {
            Ok(()) => debug!(key = %key, "Invalidated cache entry"),
            Err(e) => warn!(key = %key, error = %e, "Cache invalidation failed"),
        }
    }

    /// Drop every entry tagged with `user_id` or stored under one of its
    /// `/users/{id}` endpoints
    pub async fn invalidate_user_scope(&self, user_id: &str) {
        let backend = self.backend().await;
        let codec = &self.codec;
        let matches_user = |entry: &CacheEntry| {
            entry.scope_id.as_deref() == Some(user_id)
                || codec
                    .endpoint_of(&entry.key)
                    .and_then(user_scope_of)
                    .is_some_and(|scope| scope == user_id)
        };
        match backend.delete_where(&matches_user).await {
            Ok(removed) => debug!(user_id = user_id, removed = removed, "Invalidated user scope"),
            Err(e) => warn!(user_id = user_id, error = %e, "User scope invalidation failed"),
        }
    }

    /// Drop every cache entry and reset counters
    pub async fn invalidate_all(&self) {
        let backend = self.backend().await;
        match backend.clear().await {
            Ok(()) => {
                self.hits.store(0, Ordering::Relaxed);
                self.misses.store(0, Ordering::Relaxed);
                debug!("Cleared all cache entries");
            }
            Err(e) => warn!(error = %e, "Cache clear failed"),
        }
    }

    /// Remove entries past their stored TTL, returning how many went
    ///
    /// Reads already expire lazily; this is for callers that want to reclaim
    /// space from entries nobody reads anymore.
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let fallback = self.config.default_ttl;
        let backend = self.backend().await;
        let expired =
            |entry: &CacheEntry| entry.is_expired(now, entry.effective_ttl_ms(None, fallback));

        match backend.delete_where(&expired).await {
            Ok(removed) => {
                debug!(removed = removed, "Purged expired cache entries");
                removed
            }
            Err(e) => {
                warn!(error = %e, "Purging expired entries failed");
                0
            }
        }
    }

    /// Current entry count, size, and backend
    pub async fn stats(&self) -> CacheStats {
        let backend = self.backend().await;
        let count = backend.count().await.unwrap_or_else(|e| {
            warn!(error = %e, "Counting cache entries failed");
            0
        });
        let approx_size_bytes = backend.approx_size_bytes().await.unwrap_or_else(|e| {
            warn!(error = %e, "Sizing cache failed");
            0
        });

        CacheStats {
            count,
            approx_size_bytes,
            backend_kind: backend.kind(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Log current cache metrics
    pub async fn log_metrics(&self) {
        let stats = self.stats().await;
        debug!(
            backend = %stats.backend_kind,
            entries = stats.count,
            bytes = stats.approx_size_bytes,
            hits = stats.hits,
            misses = stats.misses,
            hit_rate = format!("{:.1}%", stats.hit_rate()),
            "Cache metrics"
        );
    }

    /// Release the backend
    ///
    /// Durable tiers persist on every write, so nothing is flushed here.
    pub async fn dispose(self) {
        if self.backend.initialized() {
            self.log_metrics().await;
        }
        debug!("Cache manager disposed");
    }

    fn record_miss(&self, key: &str) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        trace!(key = %key, "Cache MISS");
    }

    async fn delete_quietly(&self, backend: &Arc<dyn StorageBackend>, key: &str) {
        if let Err(e) = backend.delete(key).await {
            warn!(key = %key, error = %e, "Failed to delete cache entry");
        }
    }
}
