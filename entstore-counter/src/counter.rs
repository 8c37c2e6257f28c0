//! High-throughput counters spread over transactionally updated shards.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use entstore_core::{
    CallContext, EntResult, Entity, EntityCodec, EntityStoreConfig, JsonCodec, Key, KeyNamer,
    ValidationError,
};
use entstore_storage::{
    BatchedEntityStore, Cache, CacheEntry, CacheLookup, Store, Transaction, TransactionBody,
};
use rand::Rng;
use tracing::{debug, warn};

use crate::config::ShardedCounterConfig;
use crate::shard::{shard_name, CounterConfig, Shard};

/// Kind under which cached totals are named. Never stored.
const TOTAL_KIND: &str = "CounterTotal";

/// Named counters whose increments land on one of several shards.
///
/// Each increment is one store transaction touching a single shard, so
/// concurrent increments only contend when they pick the same shard. Totals
/// are cached for a bounded time and bumped in place after each increment.
#[derive(Clone)]
pub struct ShardedCounter {
    store: Arc<dyn Store>,
    cache: Option<Arc<dyn Cache>>,
    configs: BatchedEntityStore<CounterConfig>,
    shards: BatchedEntityStore<Shard>,
    namer: KeyNamer,
    config: ShardedCounterConfig,
}

impl ShardedCounter {
    pub fn new(
        store: Arc<dyn Store>,
        cache: Option<Arc<dyn Cache>>,
        config: ShardedCounterConfig,
    ) -> EntResult<Self> {
        config.validate()?;
        let mut ents = EntityStoreConfig::default();
        if let Some(ns) = &config.namespace {
            ents = ents.with_namespace(ns.clone());
        }
        Ok(Self {
            configs: BatchedEntityStore::new(Arc::clone(&store), cache.clone(), ents.clone())?,
            shards: BatchedEntityStore::new(Arc::clone(&store), cache.clone(), ents)?,
            store,
            cache,
            namer: KeyNamer::new(config.cache_key_prefix.clone()),
            config,
        })
    }

    pub fn config(&self) -> &ShardedCounterConfig {
        &self.config
    }

    /// Cache key holding the total of `key`.
    pub fn cache_key(&self, key: &str) -> String {
        let total = Key::new(TOTAL_KIND, key).in_namespace(self.config.namespace.as_deref());
        self.namer.cache_key(&total)
    }

    fn check_key(key: &str) -> Result<(), ValidationError> {
        if key.is_empty() {
            return Err(ValidationError::InvalidValue {
                field: "key".to_string(),
                reason: "counter key must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Stored shard layout of `key`, if it was ever incremented.
    pub async fn shard_config(&self, ctx: &CallContext, key: &str) -> EntResult<Option<CounterConfig>> {
        Self::check_key(key)?;
        self.configs.get(ctx, key).await
    }

    /// Add one to `key`.
    pub async fn increment(&self, ctx: &CallContext, key: &str) -> EntResult<()> {
        Self::check_key(key)?;
        let body = IncrementShard {
            counter_key: key.to_string(),
            config_key: self.configs.key_of(key),
            default_num_shards: self.config.default_num_shards,
            namespace: self.config.namespace.clone(),
        };
        self.store.transaction(ctx, &body).await?;

        if let Some(cache) = &self.cache {
            match cache.increment_existing(ctx, &self.cache_key(key), 1).await {
                Ok(Some(total)) => {
                    debug!(target: "entstore::counter", key, total, "cached total bumped")
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(target: "entstore::counter", key, error = %e, "cached total not bumped")
                }
            }
        }
        Ok(())
    }

    /// Current total of `key`, from the cache when available.
    pub async fn count(&self, ctx: &CallContext, key: &str) -> EntResult<i64> {
        Self::check_key(key)?;
        let cache_key = self.cache_key(key);

        if let Some(cache) = &self.cache {
            match cache.get_multi(ctx, std::slice::from_ref(&cache_key)).await {
                Ok(lookups) => match lookups.into_iter().next() {
                    Some(CacheLookup::Hit(payload)) => match parse_total(&payload) {
                        Some(total) => return Ok(total),
                        None => {
                            warn!(target: "entstore::counter", key, "cached total is not a number")
                        }
                    },
                    Some(CacheLookup::Failed(e)) => {
                        warn!(target: "entstore::counter", key, error = %e, "cached total lookup failed")
                    }
                    _ => {}
                },
                Err(e) => {
                    warn!(target: "entstore::counter", key, error = %e, "cached total lookup failed")
                }
            }
        }

        let total = self.count_uncached(ctx, key).await?;
        if let Some(cache) = &self.cache {
            let entry = CacheEntry::new(
                cache_key,
                total.to_string().into_bytes(),
                self.config.count_cache_ttl,
            );
            if let Err(e) = cache.set_multi(ctx, vec![entry]).await {
                warn!(target: "entstore::counter", key, error = %e, "cached total not stored");
            }
        }
        Ok(total)
    }

    /// Sum of all shards of `key`, read from the store.
    pub async fn count_uncached(&self, ctx: &CallContext, key: &str) -> EntResult<i64> {
        Self::check_key(key)?;
        let shards = self
            .shards
            .query()
            .eq("counter_key", key)
            .run_all(ctx)
            .await?;
        Ok(shards.data.iter().map(|s| s.count).sum())
    }

    /// Delete every shard of `key` and its cached total. The shard layout is
    /// kept. Returns the number of shards removed.
    pub async fn reset(&self, ctx: &CallContext, key: &str) -> EntResult<usize> {
        Self::check_key(key)?;
        let removed = self
            .shards
            .query()
            .eq("counter_key", key)
            .delete_matched(ctx)
            .await?;

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.delete_multi(ctx, &[self.cache_key(key)]).await {
                warn!(target: "entstore::counter", key, error = %e, "cached total not cleared");
            }
        }
        debug!(target: "entstore::counter", key, removed, "counter reset");
        Ok(removed)
    }
}

impl std::fmt::Debug for ShardedCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardedCounter")
            .field("cached", &self.cache.is_some())
            .field("config", &self.config)
            .finish()
    }
}

fn parse_total(payload: &[u8]) -> Option<i64> {
    std::str::from_utf8(payload).ok()?.trim().parse().ok()
}

/// Transaction body of one increment: ensure the layout exists, then bump a
/// randomly chosen shard.
struct IncrementShard {
    counter_key: String,
    config_key: Key,
    default_num_shards: u32,
    namespace: Option<String>,
}

#[async_trait]
impl TransactionBody for IncrementShard {
    async fn run(&self, tx: &dyn Transaction) -> EntResult<()> {
        let codec = JsonCodec;

        let layout: CounterConfig = match tx.get(&self.config_key).await? {
            Some(properties) => EntityCodec::<CounterConfig>::from_properties(&codec, properties)?,
            None => {
                let layout = CounterConfig::new(&self.counter_key, self.default_num_shards);
                tx.put(self.config_key.clone(), codec.to_properties(&layout)?)
                    .await?;
                layout
            }
        };

        let index = rand::rng().random_range(0..layout.num_shards.max(1));
        let shard_key = Key::new(Shard::KIND, shard_name(&self.counter_key, index))
            .in_namespace(self.namespace.as_deref());
        let mut shard: Shard = match tx.get(&shard_key).await? {
            Some(properties) => EntityCodec::<Shard>::from_properties(&codec, properties)?,
            None => Shard::new(&self.counter_key, index),
        };
        shard.count += 1;
        shard.updated_at = Some(Utc::now());
        tx.put(shard_key, codec.to_properties(&shard)?).await?;
        Ok(())
    }
}
