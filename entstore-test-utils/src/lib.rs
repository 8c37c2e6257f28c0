//! entstore Test Utilities
//!
//! Shared test infrastructure for the entstore workspace:
//! - Fixture entity kinds
//! - Call-counting and fault-injecting Store/Cache wrappers
//! - Proptest generators
//! - Tracing setup for tests

pub use entstore_core::{
    CallContext, EntError, EntResult, Entity, EntityStoreConfig, Identifier, Key, Properties,
    QuerySpec, StoreError,
};
pub use entstore_storage::{BatchedEntityStore, MemoryCache, MemoryStore};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use entstore_core::{CacheError, CacheResult, StoreResult};
use entstore_storage::{
    Cache, CacheEntry, CacheLookup, CacheStats, Lookup, QueryIterator, Store, TransactionBody,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

// ============================================================================
// FIXTURE ENTITIES
// ============================================================================

/// Root entity used across the workspace tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub title: String,
    pub author: String,
    pub views: i64,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Article {
    pub fn new(id: impl Into<String>, views: i64) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            author: String::new(),
            views,
            updated_at: None,
        }
    }

    pub fn by(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn titled(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }
}

impl Entity for Article {
    const KIND: &'static str = "Article";

    fn identifier(&self) -> Identifier {
        Identifier::Name(self.id.clone())
    }

    fn set_identifier(&mut self, identifier: Identifier) {
        self.id = identifier.to_string();
    }

    fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = Some(at);
    }
}

/// Child entity keyed under an [`Article`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub article_id: String,
    pub body: String,
}

impl Entity for Comment {
    const KIND: &'static str = "Comment";

    fn identifier(&self) -> Identifier {
        Identifier::Id(self.id)
    }

    fn set_identifier(&mut self, identifier: Identifier) {
        if let Identifier::Id(id) = identifier {
            self.id = id;
        }
    }

    fn parent(&self) -> Option<Key> {
        Some(Key::new(Article::KIND, self.article_id.as_str()))
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    use super::*;

    /// Memory store and cache plus an article store over them.
    pub struct ArticleEnv {
        pub store: Arc<CountingStore>,
        pub cache: Arc<CountingCache>,
        pub memory_store: MemoryStore,
        pub memory_cache: MemoryCache,
        pub articles: BatchedEntityStore<Article>,
    }

    pub fn article_env() -> ArticleEnv {
        article_env_with(EntityStoreConfig::default())
    }

    pub fn article_env_with(config: EntityStoreConfig) -> ArticleEnv {
        let memory_store = MemoryStore::new();
        let memory_cache = MemoryCache::new();
        let store = Arc::new(CountingStore::new(Arc::new(memory_store.clone())));
        let cache = Arc::new(CountingCache::new(Arc::new(memory_cache.clone())));
        let articles = BatchedEntityStore::new(
            store.clone() as Arc<dyn Store>,
            Some(cache.clone() as Arc<dyn Cache>),
            config,
        )
        .expect("valid config");
        ArticleEnv {
            store,
            cache,
            memory_store,
            memory_cache,
            articles,
        }
    }

    /// `count` articles named `a000`, `a001`, ... with `views` equal to the index.
    pub fn numbered_articles(count: usize) -> Vec<Article> {
        (0..count)
            .map(|i| Article::new(format!("a{:03}", i), i as i64))
            .collect()
    }
}

// ============================================================================
// COUNTING WRAPPERS
// ============================================================================

/// Snapshot of calls made through a [`CountingStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCalls {
    pub get_multi: usize,
    pub put_multi: usize,
    pub delete_multi: usize,
    pub run_query: usize,
    pub transaction: usize,
}

impl StoreCalls {
    pub fn total(&self) -> usize {
        self.get_multi + self.put_multi + self.delete_multi + self.run_query + self.transaction
    }
}

/// Store wrapper that records how often each operation is called.
pub struct CountingStore {
    inner: Arc<dyn Store>,
    get_multi: AtomicUsize,
    put_multi: AtomicUsize,
    delete_multi: AtomicUsize,
    run_query: AtomicUsize,
    transaction: AtomicUsize,
}

impl CountingStore {
    pub fn new(inner: Arc<dyn Store>) -> Self {
        Self {
            inner,
            get_multi: AtomicUsize::new(0),
            put_multi: AtomicUsize::new(0),
            delete_multi: AtomicUsize::new(0),
            run_query: AtomicUsize::new(0),
            transaction: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> StoreCalls {
        StoreCalls {
            get_multi: self.get_multi.load(Ordering::SeqCst),
            put_multi: self.put_multi.load(Ordering::SeqCst),
            delete_multi: self.delete_multi.load(Ordering::SeqCst),
            run_query: self.run_query.load(Ordering::SeqCst),
            transaction: self.transaction.load(Ordering::SeqCst),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.get_multi,
            &self.put_multi,
            &self.delete_multi,
            &self.run_query,
            &self.transaction,
        ] {
            counter.store(0, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Store for CountingStore {
    async fn get_multi(&self, ctx: &CallContext, keys: &[Key]) -> StoreResult<Vec<Lookup>> {
        self.get_multi.fetch_add(1, Ordering::SeqCst);
        self.inner.get_multi(ctx, keys).await
    }

    async fn put_multi(
        &self,
        ctx: &CallContext,
        keys: &[Key],
        properties: Vec<Properties>,
    ) -> StoreResult<()> {
        self.put_multi.fetch_add(1, Ordering::SeqCst);
        self.inner.put_multi(ctx, keys, properties).await
    }

    async fn delete_multi(&self, ctx: &CallContext, keys: &[Key]) -> StoreResult<()> {
        self.delete_multi.fetch_add(1, Ordering::SeqCst);
        self.inner.delete_multi(ctx, keys).await
    }

    async fn run_query(
        &self,
        ctx: &CallContext,
        spec: &QuerySpec,
    ) -> StoreResult<Box<dyn QueryIterator>> {
        self.run_query.fetch_add(1, Ordering::SeqCst);
        self.inner.run_query(ctx, spec).await
    }

    async fn transaction(&self, ctx: &CallContext, body: &dyn TransactionBody) -> EntResult<()> {
        self.transaction.fetch_add(1, Ordering::SeqCst);
        self.inner.transaction(ctx, body).await
    }

    async fn namespaces(&self, ctx: &CallContext) -> StoreResult<Vec<Option<String>>> {
        self.inner.namespaces(ctx).await
    }

    async fn kinds(&self, ctx: &CallContext, namespace: Option<&str>) -> StoreResult<Vec<String>> {
        self.inner.kinds(ctx, namespace).await
    }
}

/// Snapshot of calls made through a [`CountingCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheCalls {
    pub get_multi: usize,
    pub set_multi: usize,
    pub delete_multi: usize,
    pub increment_existing: usize,
}

impl CacheCalls {
    pub fn total(&self) -> usize {
        self.get_multi + self.set_multi + self.delete_multi + self.increment_existing
    }
}

/// Cache wrapper that records how often each operation is called.
pub struct CountingCache {
    inner: Arc<dyn Cache>,
    get_multi: AtomicUsize,
    set_multi: AtomicUsize,
    delete_multi: AtomicUsize,
    increment_existing: AtomicUsize,
}

impl CountingCache {
    pub fn new(inner: Arc<dyn Cache>) -> Self {
        Self {
            inner,
            get_multi: AtomicUsize::new(0),
            set_multi: AtomicUsize::new(0),
            delete_multi: AtomicUsize::new(0),
            increment_existing: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> CacheCalls {
        CacheCalls {
            get_multi: self.get_multi.load(Ordering::SeqCst),
            set_multi: self.set_multi.load(Ordering::SeqCst),
            delete_multi: self.delete_multi.load(Ordering::SeqCst),
            increment_existing: self.increment_existing.load(Ordering::SeqCst),
        }
    }
}

#[async_trait]
impl Cache for CountingCache {
    async fn get_multi(&self, ctx: &CallContext, keys: &[String]) -> CacheResult<Vec<CacheLookup>> {
        self.get_multi.fetch_add(1, Ordering::SeqCst);
        self.inner.get_multi(ctx, keys).await
    }

    async fn set_multi(&self, ctx: &CallContext, entries: Vec<CacheEntry>) -> CacheResult<()> {
        self.set_multi.fetch_add(1, Ordering::SeqCst);
        self.inner.set_multi(ctx, entries).await
    }

    async fn delete_multi(&self, ctx: &CallContext, keys: &[String]) -> CacheResult<()> {
        self.delete_multi.fetch_add(1, Ordering::SeqCst);
        self.inner.delete_multi(ctx, keys).await
    }

    async fn increment_existing(
        &self,
        ctx: &CallContext,
        key: &str,
        delta: i64,
    ) -> CacheResult<Option<i64>> {
        self.increment_existing.fetch_add(1, Ordering::SeqCst);
        self.inner.increment_existing(ctx, key, delta).await
    }

    async fn flush(&self, ctx: &CallContext) -> CacheResult<()> {
        self.inner.flush(ctx).await
    }

    async fn stats(&self) -> CacheStats {
        self.inner.stats().await
    }
}

// ============================================================================
// FAULT INJECTION
// ============================================================================

fn injected(op: &str) -> StoreError {
    StoreError::Unavailable {
        reason: format!("injected {} failure", op),
    }
}

/// Store wrapper that fails selected operations on demand.
pub struct FaultyStore {
    inner: Arc<dyn Store>,
    fail_gets: AtomicBool,
    fail_puts: AtomicBool,
    fail_queries: AtomicBool,
    fail_kinds: AtomicBool,
    /// Successful deletes left before deletes start failing.
    deletes_before_failure: AtomicUsize,
    /// Keys whose lookups report a per-key failure.
    poisoned: std::sync::Mutex<Vec<Key>>,
}

impl FaultyStore {
    pub fn new(inner: Arc<dyn Store>) -> Self {
        Self {
            inner,
            fail_gets: AtomicBool::new(false),
            fail_puts: AtomicBool::new(false),
            fail_queries: AtomicBool::new(false),
            fail_kinds: AtomicBool::new(false),
            deletes_before_failure: AtomicUsize::new(usize::MAX),
            poisoned: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn fail_gets(&self, fail: bool) {
        self.fail_gets.store(fail, Ordering::SeqCst);
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    pub fn fail_kinds(&self, fail: bool) {
        self.fail_kinds.store(fail, Ordering::SeqCst);
    }

    /// Let `count` more deletes through, then fail every later one.
    pub fn fail_deletes_after(&self, count: usize) {
        self.deletes_before_failure.store(count, Ordering::SeqCst);
    }

    /// Report a per-key failure whenever `key` is looked up.
    pub fn poison(&self, key: Key) {
        if let Ok(mut poisoned) = self.poisoned.lock() {
            poisoned.push(key);
        }
    }
}

#[async_trait]
impl Store for FaultyStore {
    async fn get_multi(&self, ctx: &CallContext, keys: &[Key]) -> StoreResult<Vec<Lookup>> {
        if self.fail_gets.load(Ordering::SeqCst) {
            return Err(injected("get"));
        }
        let mut lookups = self.inner.get_multi(ctx, keys).await?;
        let poisoned = self.poisoned.lock().map_err(|_| StoreError::LockPoisoned)?.clone();
        for (key, lookup) in keys.iter().zip(lookups.iter_mut()) {
            if poisoned.contains(key) {
                *lookup = Lookup::Failed(injected("lookup"));
            }
        }
        Ok(lookups)
    }

    async fn put_multi(
        &self,
        ctx: &CallContext,
        keys: &[Key],
        properties: Vec<Properties>,
    ) -> StoreResult<()> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(injected("put"));
        }
        self.inner.put_multi(ctx, keys, properties).await
    }

    async fn delete_multi(&self, ctx: &CallContext, keys: &[Key]) -> StoreResult<()> {
        let allowed = self
            .deletes_before_failure
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if !allowed {
            return Err(injected("delete"));
        }
        self.inner.delete_multi(ctx, keys).await
    }

    async fn run_query(
        &self,
        ctx: &CallContext,
        spec: &QuerySpec,
    ) -> StoreResult<Box<dyn QueryIterator>> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(injected("query"));
        }
        self.inner.run_query(ctx, spec).await
    }

    async fn transaction(&self, ctx: &CallContext, body: &dyn TransactionBody) -> EntResult<()> {
        self.inner.transaction(ctx, body).await
    }

    async fn namespaces(&self, ctx: &CallContext) -> StoreResult<Vec<Option<String>>> {
        self.inner.namespaces(ctx).await
    }

    async fn kinds(&self, ctx: &CallContext, namespace: Option<&str>) -> StoreResult<Vec<String>> {
        if self.fail_kinds.load(Ordering::SeqCst) && namespace.is_some() {
            return Err(injected("kinds"));
        }
        self.inner.kinds(ctx, namespace).await
    }
}

/// Cache that fails every operation, or serves undecodable payloads.
#[derive(Debug, Default)]
pub struct FaultyCache {
    garbage_hits: bool,
}

impl FaultyCache {
    /// Every operation returns an error.
    pub fn unavailable() -> Self {
        Self {
            garbage_hits: false,
        }
    }

    /// Reads hit with payloads no codec can decode. Writes succeed.
    pub fn garbage() -> Self {
        Self { garbage_hits: true }
    }

    fn fail<T>(&self) -> CacheResult<T> {
        Err(CacheError::Unavailable {
            reason: "injected cache failure".to_string(),
        })
    }
}

#[async_trait]
impl Cache for FaultyCache {
    async fn get_multi(&self, _ctx: &CallContext, keys: &[String]) -> CacheResult<Vec<CacheLookup>> {
        if self.garbage_hits {
            return Ok(keys
                .iter()
                .map(|_| CacheLookup::Hit(b"\xff not json".to_vec()))
                .collect());
        }
        self.fail()
    }

    async fn set_multi(&self, _ctx: &CallContext, _entries: Vec<CacheEntry>) -> CacheResult<()> {
        if self.garbage_hits {
            return Ok(());
        }
        self.fail()
    }

    async fn delete_multi(&self, _ctx: &CallContext, _keys: &[String]) -> CacheResult<()> {
        if self.garbage_hits {
            return Ok(());
        }
        self.fail()
    }

    async fn increment_existing(
        &self,
        _ctx: &CallContext,
        _key: &str,
        _delta: i64,
    ) -> CacheResult<Option<i64>> {
        self.fail()
    }

    async fn flush(&self, _ctx: &CallContext) -> CacheResult<()> {
        self.fail()
    }

    async fn stats(&self) -> CacheStats {
        CacheStats::default()
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use proptest::prelude::*;

    /// Non-empty article identifiers.
    pub fn arb_article_id() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_-]{0,15}"
    }

    pub fn arb_article() -> impl Strategy<Value = Article> {
        (arb_article_id(), "[A-Za-z ]{0,20}", "[a-z]{1,8}", 0i64..10_000).prop_map(
            |(id, title, author, views)| Article::new(id, views).titled(title).by(author),
        )
    }

    /// Articles with pairwise distinct identifiers.
    pub fn arb_distinct_articles(max: usize) -> impl Strategy<Value = Vec<Article>> {
        prop::collection::btree_set(arb_article_id(), 1..=max).prop_flat_map(|ids| {
            let ids: Vec<String> = ids.into_iter().collect();
            let len = ids.len();
            prop::collection::vec(0i64..100, len).prop_map(move |views| {
                ids.iter()
                    .zip(views)
                    .map(|(id, v)| Article::new(id.clone(), v))
                    .collect::<Vec<Article>>()
            })
        })
    }
}

// ============================================================================
// TRACING
// ============================================================================

/// Install a test-friendly subscriber once. Honors `RUST_LOG`.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
