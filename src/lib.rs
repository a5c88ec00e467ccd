//! Tiered API response cache
//!
//! Caches REST responses keyed by endpoint and parameters. Storage is picked
//! once per [`CacheManager`] from a durable structured store, a durable
//! key-value namespace, or process memory, whichever works first.
//!
//! ```no_run
//! use api_cache::{CacheConfig, CacheManager, Params, ReadOptions, WriteOptions};
//!
//! # async fn example() {
//! let cache = CacheManager::new(CacheConfig::from_env());
//! let params = Params::new().with("page", 1).with("limit", 50);
//!
//! if cache.read::<serde_json::Value>("/institute-classes", &params, ReadOptions::new()).await.is_none() {
//!     let fresh = serde_json::json!([{"id": "x"}]);
//!     cache.write("/institute-classes", &params, &fresh, WriteOptions::new()).await;
//! }
//! # }
//! ```

pub mod cache;
pub mod clock;
pub mod config;
pub mod storage;

pub use cache::{CacheEntry, CacheManager, CacheStats, KeyCodec, Params, ReadOptions, WriteOptions};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CacheConfig;
pub use storage::{BackendKind, StorageBackend, StorageError};
