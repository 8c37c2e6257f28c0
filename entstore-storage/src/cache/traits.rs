//! Cache contract consumed by entity stores and counters.

use async_trait::async_trait;
use entstore_core::{CacheError, CacheResult, CallContext};
use std::time::Duration;

/// Per-key outcome of a batched cache read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    Hit(Vec<u8>),
    Miss,
    Failed(CacheError),
}

impl CacheLookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheLookup::Hit(_))
    }
}

/// One value to store in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    pub payload: Vec<u8>,
    /// Zero means no expiry.
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, payload: Vec<u8>, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            payload,
            ttl,
        }
    }
}

/// Cache statistics for monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entry_count: u64,
    /// Entries dropped because their TTL ran out.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Batched look-aside cache over opaque byte payloads keyed by string.
///
/// Implementations must honor `ctx` at their I/O boundary.
#[async_trait]
pub trait Cache: Send + Sync {
    /// One lookup per key, in input order.
    async fn get_multi(&self, ctx: &CallContext, keys: &[String]) -> CacheResult<Vec<CacheLookup>>;

    async fn set_multi(&self, ctx: &CallContext, entries: Vec<CacheEntry>) -> CacheResult<()>;

    /// Removing a key that is not cached is not an error.
    async fn delete_multi(&self, ctx: &CallContext, keys: &[String]) -> CacheResult<()>;

    /// Add `delta` to a cached decimal counter. `None` if the key is not cached.
    async fn increment_existing(
        &self,
        ctx: &CallContext,
        key: &str,
        delta: i64,
    ) -> CacheResult<Option<i64>>;

    /// Drop every entry.
    async fn flush(&self, ctx: &CallContext) -> CacheResult<()>;

    async fn stats(&self) -> CacheStats;
}
