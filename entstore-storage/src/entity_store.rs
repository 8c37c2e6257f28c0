//! Cache-aside batched entity store.
//!
//! Reads go to the look-aside cache first and fall back to the store for the
//! keys the cache could not serve; found entities are written back to the
//! cache. Writes go to the store and then delete the affected cache entries.
//! Cache failures only cost performance. Store failures abort the call.

use std::sync::Arc;

use chrono::Utc;
use entstore_core::{
    CallContext, EntError, EntResult, Entity, EntityCodec, EntityHooks, EntityStoreConfig,
    IntoKey, JsonCodec, Key, KeyNamer, NoHooks, Replacer, StoreError, ValidationError,
};
use tracing::{debug, error, warn};

use crate::cache::{Cache, CacheEntry, CacheLookup};
use crate::query::Query;
use crate::store::{Lookup, Store};

/// Batched Get/Put/Delete/Replace for one entity kind.
pub struct BatchedEntityStore<T: Entity> {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) cache: Option<Arc<dyn Cache>>,
    pub(crate) codec: Arc<dyn EntityCodec<T>>,
    pub(crate) hooks: Arc<dyn EntityHooks<T>>,
    pub(crate) namer: KeyNamer,
    pub(crate) config: EntityStoreConfig,
}

impl<T: Entity> BatchedEntityStore<T> {
    /// Create a store with the JSON codec and no hooks.
    pub fn new(
        store: Arc<dyn Store>,
        cache: Option<Arc<dyn Cache>>,
        config: EntityStoreConfig,
    ) -> EntResult<Self> {
        config.validate()?;
        Ok(Self {
            store,
            cache,
            codec: Arc::new(JsonCodec),
            hooks: Arc::new(NoHooks),
            namer: KeyNamer::new(config.cache_key_prefix.clone()),
            config,
        })
    }

    pub fn with_codec(mut self, codec: Arc<dyn EntityCodec<T>>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn EntityHooks<T>>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn config(&self) -> &EntityStoreConfig {
        &self.config
    }

    pub fn namer(&self) -> &KeyNamer {
        &self.namer
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Same store with the look-aside cache bypassed for reads.
    pub fn uncached(&self) -> Self {
        let mut store = self.clone();
        store.config.no_cache = true;
        store
    }

    /// Cache consulted by reads. `None` when caching is off.
    fn read_cache(&self) -> Option<&Arc<dyn Cache>> {
        if self.config.no_cache {
            None
        } else {
            self.cache.as_ref()
        }
    }

    // ========================================================================
    // KEYS
    // ========================================================================

    /// Key of `id` in this store's kind and namespace. Keys pass through as-is.
    pub fn key_of(&self, id: impl IntoKey) -> Key {
        id.into_key(T::KIND, self.config.namespace.as_deref())
    }

    pub fn key_for(&self, entity: &T) -> EntResult<Key> {
        let identifier = entity.identifier();
        if !identifier.is_complete() {
            return Err(ValidationError::IncompleteKey {
                kind: T::KIND.to_string(),
            }
            .into());
        }
        let key = self
            .namer
            .store_key(T::KIND, identifier, self.config.namespace.as_deref());
        Ok(match entity.parent() {
            Some(parent) => key.with_parent(parent),
            None => key,
        })
    }

    pub fn keys_for(&self, entities: &[T]) -> EntResult<Vec<Key>> {
        entities.iter().map(|e| self.key_for(e)).collect()
    }

    fn check_batch(&self, len: usize) -> Result<(), ValidationError> {
        if len > self.config.batch_limit {
            return Err(ValidationError::TooManyKeys {
                given: len,
                limit: self.config.batch_limit,
            });
        }
        Ok(())
    }

    fn check_keys(&self, keys: &[Key]) -> Result<(), ValidationError> {
        self.check_batch(keys.len())?;
        for key in keys {
            if key.kind() != T::KIND {
                return Err(ValidationError::KindMismatch {
                    expected: T::KIND.to_string(),
                    actual: key.kind().to_string(),
                });
            }
            if !key.is_complete() {
                return Err(ValidationError::IncompleteKey {
                    kind: T::KIND.to_string(),
                });
            }
        }
        Ok(())
    }

    // ========================================================================
    // GET
    // ========================================================================

    /// Fetch entities by key, index-aligned with `keys`. Absent keys yield `None`.
    pub async fn get_multi(&self, ctx: &CallContext, keys: &[Key]) -> EntResult<Vec<Option<T>>> {
        self.fetch(ctx, keys, self.config.use_default_if_absent).await
    }

    pub async fn get(&self, ctx: &CallContext, id: impl IntoKey) -> EntResult<Option<T>> {
        let key = self.key_of(id);
        let mut found = self.get_multi(ctx, std::slice::from_ref(&key)).await?;
        Ok(found.pop().flatten())
    }

    async fn fetch(
        &self,
        ctx: &CallContext,
        keys: &[Key],
        fill_defaults: bool,
    ) -> EntResult<Vec<Option<T>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        self.check_keys(keys)?;

        let mut results: Vec<Option<T>> = vec![None; keys.len()];
        let cache = self.read_cache();
        let cache_keys = match cache {
            Some(_) => self.namer.cache_keys(keys),
            None => Vec::new(),
        };

        let misses: Vec<usize> = match cache {
            Some(cache) => {
                let misses = self.read_from_cache(ctx, cache, &cache_keys, &mut results).await;
                if misses.is_empty() {
                    debug!(target: "entstore::ent", kind = T::KIND, count = keys.len(), "served from cache");
                    return Ok(results);
                }
                misses
            }
            None => (0..keys.len()).collect(),
        };

        let miss_keys: Vec<Key> = misses.iter().map(|&i| keys[i].clone()).collect();
        let lookups = match self.store.get_multi(ctx, &miss_keys).await {
            Ok(lookups) => lookups,
            Err(e) => {
                error!(target: "entstore::ent", kind = T::KIND, error = %e, "store get failed");
                return Err(e.into());
            }
        };
        if lookups.len() != miss_keys.len() {
            let e = StoreError::InvalidRequest {
                reason: format!(
                    "store returned {} results for {} keys",
                    lookups.len(),
                    miss_keys.len()
                ),
            };
            error!(target: "entstore::ent", kind = T::KIND, error = %e, "store get failed");
            return Err(e.into());
        }

        let mut repopulate = Vec::new();
        let mut found = 0usize;
        for (&slot, lookup) in misses.iter().zip(lookups) {
            let properties = match lookup {
                Lookup::Found(properties) => properties,
                Lookup::Failed(e) if e.is_failure() => {
                    error!(target: "entstore::ent", kind = T::KIND, key = %keys[slot], error = %e, "store get failed");
                    return Err(e.into());
                }
                Lookup::Absent | Lookup::Failed(_) => {
                    if fill_defaults {
                        results[slot] = self.hooks.default_value(&keys[slot]);
                    }
                    continue;
                }
            };

            let entity = self.codec.from_properties(properties).map_err(|e| {
                error!(target: "entstore::ent", kind = T::KIND, key = %keys[slot], error = %e, "stored entity does not decode");
                EntError::from(e)
            })?;
            if cache.is_some() {
                match self.codec.encode(&entity) {
                    Ok(payload) => repopulate.push(CacheEntry::new(
                        cache_keys[slot].clone(),
                        payload,
                        self.config.cache_ttl,
                    )),
                    Err(e) => {
                        warn!(target: "entstore::ent", kind = T::KIND, error = %e, "cannot encode entity for cache")
                    }
                }
            }
            results[slot] = Some(entity);
            found += 1;
        }

        debug!(
            target: "entstore::ent",
            kind = T::KIND,
            requested = keys.len(),
            store_lookups = misses.len(),
            found,
            "fetched from store"
        );

        if let (Some(cache), false) = (cache, repopulate.is_empty()) {
            if let Err(e) = cache.set_multi(ctx, repopulate).await {
                warn!(target: "entstore::ent", kind = T::KIND, error = %e, "cache repopulate failed");
            }
        }
        Ok(results)
    }

    /// Fill `results` from the cache and return the indices it could not serve.
    async fn read_from_cache(
        &self,
        ctx: &CallContext,
        cache: &Arc<dyn Cache>,
        cache_keys: &[String],
        results: &mut [Option<T>],
    ) -> Vec<usize> {
        let lookups = match cache.get_multi(ctx, cache_keys).await {
            Ok(lookups) if lookups.len() == cache_keys.len() => lookups,
            Ok(lookups) => {
                warn!(
                    target: "entstore::ent",
                    kind = T::KIND,
                    expected = cache_keys.len(),
                    got = lookups.len(),
                    "cache returned wrong number of results"
                );
                return (0..cache_keys.len()).collect();
            }
            Err(e) => {
                warn!(target: "entstore::ent", kind = T::KIND, error = %e, "cache get failed");
                return (0..cache_keys.len()).collect();
            }
        };

        let mut misses = Vec::new();
        for (i, lookup) in lookups.into_iter().enumerate() {
            match lookup {
                CacheLookup::Hit(payload) => match self.codec.decode(&payload) {
                    Ok(entity) => results[i] = Some(entity),
                    Err(e) => {
                        warn!(target: "entstore::ent", kind = T::KIND, cache_key = %cache_keys[i], error = %e, "cached payload does not decode");
                        misses.push(i);
                    }
                },
                CacheLookup::Miss => misses.push(i),
                CacheLookup::Failed(e) => {
                    warn!(target: "entstore::ent", kind = T::KIND, cache_key = %cache_keys[i], error = %e, "cache lookup failed");
                    misses.push(i);
                }
            }
        }
        misses
    }

    // ========================================================================
    // PUT / DELETE
    // ========================================================================

    /// Write entities and invalidate their cache entries.
    ///
    /// Entities are updated in place: identifiers assigned, save hooks run and
    /// the update timestamp stamped. Returns their keys in input order.
    pub async fn put_multi(&self, ctx: &CallContext, entities: &mut [T]) -> EntResult<Vec<Key>> {
        if entities.is_empty() {
            return Ok(Vec::new());
        }
        self.check_batch(entities.len())?;

        for entity in entities.iter_mut() {
            self.hooks.assign_identifier(entity)?;
        }
        let keys = self.keys_for(entities)?;
        for entity in entities.iter_mut() {
            self.hooks.before_save(entity)?;
        }
        if !self.config.no_timestamp_update {
            let now = Utc::now();
            for entity in entities.iter_mut() {
                entity.touch(now);
            }
        }
        let properties = entities
            .iter()
            .map(|e| self.codec.to_properties(e))
            .collect::<Result<Vec<_>, _>>()?;

        if let Err(e) = self.store.put_multi(ctx, &keys, properties).await {
            error!(target: "entstore::ent", kind = T::KIND, count = keys.len(), error = %e, "store put failed");
            return Err(e.into());
        }
        self.invalidate(ctx, &keys).await;
        debug!(target: "entstore::ent", kind = T::KIND, count = keys.len(), "put");

        for entity in entities.iter() {
            self.hooks.after_save(entity)?;
        }
        Ok(keys)
    }

    pub async fn put(&self, ctx: &CallContext, entity: &mut T) -> EntResult<Key> {
        let mut keys = self
            .put_multi(ctx, std::slice::from_mut(entity))
            .await?;
        keys.pop().ok_or_else(|| {
            StoreError::InvalidRequest {
                reason: "put returned no key".to_string(),
            }
            .into()
        })
    }

    /// Delete entities from the store, then invalidate their cache entries.
    pub async fn delete_multi(&self, ctx: &CallContext, keys: &[Key]) -> EntResult<Vec<Key>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        self.check_keys(keys)?;

        if let Err(e) = self.store.delete_multi(ctx, keys).await {
            error!(target: "entstore::ent", kind = T::KIND, count = keys.len(), error = %e, "store delete failed");
            return Err(e.into());
        }
        self.invalidate(ctx, keys).await;
        debug!(target: "entstore::ent", kind = T::KIND, count = keys.len(), "deleted");
        Ok(keys.to_vec())
    }

    pub async fn delete(&self, ctx: &CallContext, id: impl IntoKey) -> EntResult<Key> {
        let key = self.key_of(id);
        self.delete_multi(ctx, std::slice::from_ref(&key)).await?;
        Ok(key)
    }

    /// Drop cache entries for `keys`. Runs even when reads bypass the cache so
    /// other readers of the same cache never see the old value.
    async fn invalidate(&self, ctx: &CallContext, keys: &[Key]) {
        let Some(cache) = &self.cache else {
            return;
        };
        let cache_keys = self.namer.cache_keys(keys);
        if let Err(e) = cache.delete_multi(ctx, &cache_keys).await {
            warn!(target: "entstore::ent", kind = T::KIND, count = keys.len(), error = %e, "cache invalidation failed");
        }
    }

    // ========================================================================
    // REPLACE
    // ========================================================================

    /// Merge each entity into its stored version with `replacer`, then put.
    ///
    /// The read and the write are separate calls; a concurrent writer between
    /// them is overwritten.
    pub async fn replace_multi(
        &self,
        ctx: &CallContext,
        entities: Vec<T>,
        replacer: &dyn Replacer<T>,
    ) -> EntResult<(Vec<Key>, Vec<T>)> {
        if entities.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }
        self.check_batch(entities.len())?;

        let mut incoming = entities;
        for entity in incoming.iter_mut() {
            self.hooks.assign_identifier(entity)?;
        }
        let keys = self.keys_for(&incoming)?;
        let existing = self.fetch(ctx, &keys, false).await?;

        let mut merged: Vec<T> = incoming
            .into_iter()
            .zip(existing)
            .map(|(incoming, existing)| match existing {
                Some(existing) => replacer.replace(existing, incoming),
                None => incoming,
            })
            .collect();
        let keys = self.put_multi(ctx, &mut merged).await?;
        Ok((keys, merged))
    }

    pub async fn replace(
        &self,
        ctx: &CallContext,
        entity: T,
        replacer: &dyn Replacer<T>,
    ) -> EntResult<(Key, T)> {
        let (mut keys, mut merged) = self.replace_multi(ctx, vec![entity], replacer).await?;
        match (keys.pop(), merged.pop()) {
            (Some(key), Some(entity)) => Ok((key, entity)),
            _ => Err(StoreError::InvalidRequest {
                reason: "replace returned no entity".to_string(),
            }
            .into()),
        }
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    /// Start a query over this kind in this store's namespace.
    pub fn query(&self) -> Query<T> {
        Query::new(self.clone())
    }
}

impl<T: Entity> Clone for BatchedEntityStore<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            cache: self.cache.clone(),
            codec: Arc::clone(&self.codec),
            hooks: Arc::clone(&self.hooks),
            namer: self.namer.clone(),
            config: self.config.clone(),
        }
    }
}

impl<T: Entity> std::fmt::Debug for BatchedEntityStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchedEntityStore")
            .field("kind", &T::KIND)
            .field("cached", &self.cache.is_some())
            .field("config", &self.config)
            .finish()
    }
}
