//! In-memory cache backend with lazy TTL expiry.

use super::traits::{Cache, CacheEntry, CacheLookup, CacheStats};
use async_trait::async_trait;
use entstore_core::{CacheError, CacheResult, CallContext};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

#[derive(Debug, Clone)]
struct Slot {
    payload: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

/// Process-local cache keyed by string.
///
/// Expired entries are dropped when a read or write touches them.
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    slots: Arc<RwLock<HashMap<String, Slot>>>,
    counters: Arc<Counters>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live payload stored under `key`, without touching hit/miss counters.
    pub fn peek(&self, key: &str) -> Option<Vec<u8>> {
        let slots = self.slots.read().ok()?;
        let now = Instant::now();
        slots
            .get(key)
            .filter(|slot| slot.is_live(now))
            .map(|slot| slot.payload.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.peek(key).is_some()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.slots
            .read()
            .map(|slots| slots.values().filter(|s| s.is_live(now)).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict_expired(&self, keys: &[&str]) -> CacheResult<()> {
        let mut slots = self.slots.write().map_err(|_| CacheError::LockPoisoned)?;
        let now = Instant::now();
        for key in keys {
            if slots.get(*key).is_some_and(|slot| !slot.is_live(now)) {
                slots.remove(*key);
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get_multi(&self, ctx: &CallContext, keys: &[String]) -> CacheResult<Vec<CacheLookup>> {
        ctx.check()?;
        let now = Instant::now();
        let mut expired = Vec::new();
        let lookups: Vec<CacheLookup> = {
            let slots = self.slots.read().map_err(|_| CacheError::LockPoisoned)?;
            keys.iter()
                .map(|key| match slots.get(key) {
                    Some(slot) if slot.is_live(now) => CacheLookup::Hit(slot.payload.clone()),
                    Some(_) => {
                        expired.push(key.as_str());
                        CacheLookup::Miss
                    }
                    None => CacheLookup::Miss,
                })
                .collect()
        };

        let hits = lookups.iter().filter(|l| l.is_hit()).count() as u64;
        self.counters.hits.fetch_add(hits, Ordering::Relaxed);
        self.counters
            .misses
            .fetch_add(lookups.len() as u64 - hits, Ordering::Relaxed);

        if !expired.is_empty() {
            self.evict_expired(&expired)?;
        }
        Ok(lookups)
    }

    async fn set_multi(&self, ctx: &CallContext, entries: Vec<CacheEntry>) -> CacheResult<()> {
        ctx.check()?;
        let now = Instant::now();
        let mut slots = self.slots.write().map_err(|_| CacheError::LockPoisoned)?;
        for entry in entries {
            let expires_at = (!entry.ttl.is_zero()).then(|| now + entry.ttl);
            slots.insert(
                entry.key,
                Slot {
                    payload: entry.payload,
                    expires_at,
                },
            );
        }
        Ok(())
    }

    async fn delete_multi(&self, ctx: &CallContext, keys: &[String]) -> CacheResult<()> {
        ctx.check()?;
        let mut slots = self.slots.write().map_err(|_| CacheError::LockPoisoned)?;
        for key in keys {
            slots.remove(key);
        }
        Ok(())
    }

    async fn increment_existing(
        &self,
        ctx: &CallContext,
        key: &str,
        delta: i64,
    ) -> CacheResult<Option<i64>> {
        ctx.check()?;
        let now = Instant::now();
        let mut slots = self.slots.write().map_err(|_| CacheError::LockPoisoned)?;
        let Some(slot) = slots.get_mut(key) else {
            return Ok(None);
        };
        if !slot.is_live(now) {
            slots.remove(key);
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }

        let current: i64 = std::str::from_utf8(&slot.payload)
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .ok_or_else(|| CacheError::NotANumber {
                key: key.to_string(),
            })?;
        let next = current.saturating_add(delta);
        slot.payload = next.to_string().into_bytes();
        Ok(Some(next))
    }

    async fn flush(&self, ctx: &CallContext) -> CacheResult<()> {
        ctx.check()?;
        let mut slots = self.slots.write().map_err(|_| CacheError::LockPoisoned)?;
        slots.clear();
        Ok(())
    }

    async fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            entry_count: self.len() as u64,
            evictions: self.counters.evictions.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
