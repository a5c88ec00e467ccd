//! Cache entry model
//!
//! The persisted unit shared by every storage backend.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::storage::StorageError;

/// A stored API response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// The response body, opaque to the cache
    pub payload: Value,
    /// Creation time in milliseconds since the epoch; never refreshed on access
    pub created_at: u64,
    /// Fully-qualified cache key this entry was stored under
    pub key: String,
    /// Lifetime fixed at write time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,
    /// Owner tag used for scoped invalidation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_id: Option<String>,
}

impl CacheEntry {
    /// Create an entry without a TTL or scope
    pub fn new(key: impl Into<String>, payload: Value, created_at: u64) -> Self {
        Self {
            payload,
            created_at,
            key: key.into(),
            ttl_ms: None,
            scope_id: None,
        }
    }

    /// Attach the write-time TTL
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_ms = Some(duration_ms(ttl));
        self
    }

    /// Attach a scope tag
    pub fn with_scope(mut self, scope_id: Option<String>) -> Self {
        self.scope_id = scope_id;
        self
    }

    /// Lifetime to enforce for a read
    ///
    /// A reader may ask for fresher data than the writer promised, never staler:
    /// the result is the smaller of the stored TTL and `read_ttl`. Entries
    /// without a stored TTL use `read_ttl`, then `fallback`.
    pub fn effective_ttl_ms(&self, read_ttl: Option<Duration>, fallback: Duration) -> u64 {
        let read_ms = read_ttl.map(duration_ms);
        match (self.ttl_ms, read_ms) {
            (Some(stored), Some(read)) => stored.min(read),
            (Some(stored), None) => stored,
            (None, Some(read)) => read,
            (None, None) => duration_ms(fallback),
        }
    }

    /// Milliseconds since creation; zero if the clock went backwards
    pub fn age_ms(&self, now: u64) -> u64 {
        now.saturating_sub(self.created_at)
    }

    /// Whether the entry is older than `ttl_ms` at `now`
    pub fn is_expired(&self, now: u64, ttl_ms: u64) -> bool {
        self.age_ms(now) > ttl_ms
    }

    /// Encode for a text-based store
    pub fn to_json(&self) -> Result<String, StorageError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode text read back from a store
    ///
    /// Undecodable text is reported as [`StorageError::Corrupt`] so callers
    /// can drop the entry instead of failing forever on it.
    pub fn from_json(key: &str, text: &str) -> Result<Self, StorageError> {
        serde_json::from_str(text).map_err(|e| StorageError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    /// Size of the encoded entry in bytes
    pub fn approx_size_bytes(&self) -> u64 {
        serde_json::to_vec(self)
            .map(|v| v.len() as u64)
            .unwrap_or(0)
    }
}

/// Whole milliseconds in `d`, saturating at `u64::MAX`
pub fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
