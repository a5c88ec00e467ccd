//! Response caching layer
//!
//! Maps endpoint calls to stored responses with per-entry TTLs and scoped
//! invalidation. Backend choice is invisible at this level.

pub mod entry;
pub mod key;
pub mod manager;

pub use entry::CacheEntry;
pub use key::{user_scope_of, KeyCodec, Params};
pub use manager::{CacheManager, CacheStats, ReadOptions, WriteOptions};
