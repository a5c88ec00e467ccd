//! Cache configuration
//!
//! Defaults match the REST client's conventions; every field can be
//! overridden from the environment (see [`CacheConfig::from_env`]).

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::storage::BackendKind;

/// Prefix for every key the cache creates in a shared namespace
pub const DEFAULT_PREFIX: &str = "api_cache_";

/// Default time-to-live: 30 minutes
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

/// Default key-value quota: 5 MiB, matching typical browser storage limits
pub const DEFAULT_QUOTA_BYTES: u64 = 5 * 1024 * 1024;

/// Current schema version of the structured store
pub const DEFAULT_SCHEMA_VERSION: u32 = 1;

/// Configuration for a [`CacheManager`](crate::CacheManager)
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Root directory for the durable stores
    pub storage_root: PathBuf,
    /// Prefix prepended to every cache key
    pub prefix: String,
    /// TTL applied to writes that don't specify one
    pub default_ttl: Duration,
    /// Tiers to probe, in priority order
    pub tiers: Vec<BackendKind>,
    /// Maximum total size of the key-value namespace
    pub quota_bytes: u64,
    /// Expected structured store schema version
    pub schema_version: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let storage_root = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("api-cache");

        Self {
            storage_root,
            prefix: DEFAULT_PREFIX.to_string(),
            default_ttl: DEFAULT_TTL,
            tiers: vec![
                BackendKind::DurableStructured,
                BackendKind::DurableKeyValue,
                BackendKind::Volatile,
            ],
            quota_bytes: DEFAULT_QUOTA_BYTES,
            schema_version: DEFAULT_SCHEMA_VERSION,
        }
    }
}

impl CacheConfig {
    /// Build a configuration from defaults overridden by environment variables
    ///
    /// * `API_CACHE_DIR` - storage root
    /// * `API_CACHE_PREFIX` - key prefix
    /// * `API_CACHE_TTL_MINUTES` - default TTL
    /// * `API_CACHE_TIERS` - comma-separated tier list (`structured,key-value,volatile`)
    /// * `API_CACHE_QUOTA_BYTES` - key-value quota
    /// * `API_CACHE_SCHEMA_VERSION` - structured store schema version
    ///
    /// Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(dir) = lookup("API_CACHE_DIR").filter(|s| !s.is_empty()) {
            config.storage_root = PathBuf::from(dir);
        }

        if let Some(prefix) = lookup("API_CACHE_PREFIX").filter(|s| !s.is_empty()) {
            config.prefix = prefix;
        }

        if let Some(raw) = lookup("API_CACHE_TTL_MINUTES") {
            match raw.trim().parse::<u64>() {
                Ok(minutes) => match minutes.checked_mul(60) {
                    Some(secs) => config.default_ttl = Duration::from_secs(secs),
                    None => warn!(value = %raw, "Ignoring out-of-range API_CACHE_TTL_MINUTES"),
                },
                Err(e) => warn!(value = %raw, error = %e, "Ignoring invalid API_CACHE_TTL_MINUTES"),
            }
        }

        if let Some(raw) = lookup("API_CACHE_TIERS") {
            let parsed: Result<Vec<BackendKind>, _> = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::parse)
                .collect();
            match parsed {
                Ok(tiers) if !tiers.is_empty() => config.tiers = tiers,
                Ok(_) => warn!("Ignoring empty API_CACHE_TIERS"),
                Err(e) => warn!(value = %raw, error = %e, "Ignoring invalid API_CACHE_TIERS"),
            }
        }

        if let Some(raw) = lookup("API_CACHE_QUOTA_BYTES") {
            match raw.trim().parse::<u64>() {
                Ok(quota) => config.quota_bytes = quota,
                Err(e) => warn!(value = %raw, error = %e, "Ignoring invalid API_CACHE_QUOTA_BYTES"),
            }
        }

        if let Some(raw) = lookup("API_CACHE_SCHEMA_VERSION") {
            match raw.trim().parse::<u32>() {
                Ok(version) => config.schema_version = version,
                Err(e) => warn!(value = %raw, error = %e, "Ignoring invalid API_CACHE_SCHEMA_VERSION"),
            }
        }

        config
    }

    /// Use a specific storage root
    pub fn with_storage_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.storage_root = root.into();
        self
    }

    /// Use a specific key prefix
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Use a specific default TTL
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Restrict probing to the given tiers, in order
    pub fn with_tiers(mut self, tiers: Vec<BackendKind>) -> Self {
        self.tiers = tiers;
        self
    }

    /// Use a specific key-value quota
    pub fn with_quota_bytes(mut self, quota: u64) -> Self {
        self.quota_bytes = quota;
        self
    }

    /// Use a specific structured store schema version
    pub fn with_schema_version(mut self, version: u32) -> Self {
        self.schema_version = version;
        self
    }

    /// Directory of the structured store
    pub fn structured_dir(&self) -> PathBuf {
        self.storage_root.join("structured")
    }

    /// File backing the shared key-value namespace
    pub fn key_value_path(&self) -> PathBuf {
        self.storage_root.join("local_storage.json")
    }
}
