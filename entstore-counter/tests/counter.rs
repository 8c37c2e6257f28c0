//! ShardedCounter behavior against the in-memory backends.

use std::sync::Arc;
use std::time::Duration;

use entstore_core::{CallContext, EntError, Key, ValidationError};
use entstore_counter::{shard_name, Shard, ShardedCounter, ShardedCounterConfig};
use entstore_storage::{Cache, MemoryCache, MemoryStore, Store};
use entstore_test_utils::{init_test_tracing, CountingStore, FaultyCache};
use tokio::task::JoinSet;

fn counter_with(config: ShardedCounterConfig) -> (ShardedCounter, Arc<MemoryStore>, Arc<MemoryCache>) {
    init_test_tracing();
    let store = Arc::new(MemoryStore::new());
    let cache = Arc::new(MemoryCache::new());
    let counter = ShardedCounter::new(
        Arc::clone(&store) as Arc<dyn Store>,
        Some(Arc::clone(&cache) as Arc<dyn Cache>),
        config,
    )
    .unwrap();
    (counter, store, cache)
}

async fn increment_concurrently(counter: &ShardedCounter, key: &str, times: usize) {
    let mut tasks = JoinSet::new();
    for _ in 0..times {
        let counter = counter.clone();
        let key = key.to_string();
        tasks.spawn(async move { counter.increment(&CallContext::new(), &key).await });
    }
    while let Some(joined) = tasks.join_next().await {
        joined.unwrap().unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_increments_are_not_lost() {
    let (counter, _, _) = counter_with(ShardedCounterConfig::default());
    let ctx = CallContext::new();

    increment_concurrently(&counter, "page-views", 1000).await;

    assert_eq!(counter.count_uncached(&ctx, "page-views").await.unwrap(), 1000);
    assert_eq!(counter.count(&ctx, "page-views").await.unwrap(), 1000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_shard_counter_serializes_increments() {
    let (counter, store, _) = counter_with(ShardedCounterConfig::default().with_num_shards(1));
    let ctx = CallContext::new();

    increment_concurrently(&counter, "hot", 200).await;

    assert_eq!(counter.count_uncached(&ctx, "hot").await.unwrap(), 200);
    let shard_key = Key::new("CounterShard", shard_name("hot", 0));
    let properties = store.properties(&shard_key).unwrap();
    assert_eq!(properties["count"], 200);
}

#[tokio::test]
async fn test_first_increment_creates_layout() {
    let (counter, _, _) = counter_with(ShardedCounterConfig::default());
    let ctx = CallContext::new();

    assert!(counter.shard_config(&ctx, "signups").await.unwrap().is_none());
    counter.increment(&ctx, "signups").await.unwrap();

    let layout = counter.shard_config(&ctx, "signups").await.unwrap().unwrap();
    assert_eq!(layout.key, "signups");
    assert_eq!(layout.num_shards, 10);
}

#[tokio::test]
async fn test_unknown_counter_counts_zero() {
    let (counter, _, _) = counter_with(ShardedCounterConfig::default());
    assert_eq!(counter.count(&CallContext::new(), "never").await.unwrap(), 0);
}

#[tokio::test]
async fn test_count_is_cached_and_bumped_in_place() {
    let (counter, _, cache) = counter_with(ShardedCounterConfig::default());
    let ctx = CallContext::new();

    for _ in 0..3 {
        counter.increment(&ctx, "likes").await.unwrap();
    }
    assert!(!cache.contains(&counter.cache_key("likes")));

    assert_eq!(counter.count(&ctx, "likes").await.unwrap(), 3);
    assert_eq!(cache.peek(&counter.cache_key("likes")), Some(b"3".to_vec()));

    counter.increment(&ctx, "likes").await.unwrap();
    assert_eq!(cache.peek(&counter.cache_key("likes")), Some(b"4".to_vec()));
    assert_eq!(counter.count(&ctx, "likes").await.unwrap(), 4);
}

#[tokio::test]
async fn test_cached_total_expires() {
    let (counter, _, cache) = counter_with(
        ShardedCounterConfig::default().with_count_cache_ttl(Duration::from_millis(20)),
    );
    let ctx = CallContext::new();

    counter.increment(&ctx, "ttl").await.unwrap();
    assert_eq!(counter.count(&ctx, "ttl").await.unwrap(), 1);
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert!(!cache.contains(&counter.cache_key("ttl")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reset_after_concurrent_increments_counts_zero() {
    for shards in [1, 10] {
        let (counter, _, cache) =
            counter_with(ShardedCounterConfig::default().with_num_shards(shards));
        let ctx = CallContext::new();

        increment_concurrently(&counter, "downloads", 1000).await;
        counter.increment(&ctx, "other").await.unwrap();
        assert_eq!(counter.count(&ctx, "downloads").await.unwrap(), 1000);

        let removed = counter.reset(&ctx, "downloads").await.unwrap();
        assert!((1..=shards as usize).contains(&removed));
        assert!(!cache.contains(&counter.cache_key("downloads")));
        assert_eq!(counter.count(&ctx, "downloads").await.unwrap(), 0);
        assert_eq!(counter.count_uncached(&ctx, "downloads").await.unwrap(), 0);
        assert_eq!(counter.count(&ctx, "other").await.unwrap(), 1);

        // Layout survives a reset.
        assert!(counter.shard_config(&ctx, "downloads").await.unwrap().is_some());
        counter.increment(&ctx, "downloads").await.unwrap();
        assert_eq!(counter.count_uncached(&ctx, "downloads").await.unwrap(), 1);
    }
}

#[tokio::test]
async fn test_cache_failures_are_tolerated() {
    init_test_tracing();
    let counter = ShardedCounter::new(
        Arc::new(MemoryStore::new()) as Arc<dyn Store>,
        Some(Arc::new(FaultyCache::unavailable()) as Arc<dyn Cache>),
        ShardedCounterConfig::default(),
    )
    .unwrap();
    let ctx = CallContext::new();

    counter.increment(&ctx, "resilient").await.unwrap();
    counter.increment(&ctx, "resilient").await.unwrap();
    assert_eq!(counter.count(&ctx, "resilient").await.unwrap(), 2);
    assert!(counter.reset(&ctx, "resilient").await.unwrap() > 0);
}

#[tokio::test]
async fn test_garbage_cached_total_falls_back_to_store() {
    init_test_tracing();
    let counter = ShardedCounter::new(
        Arc::new(MemoryStore::new()) as Arc<dyn Store>,
        Some(Arc::new(FaultyCache::garbage()) as Arc<dyn Cache>),
        ShardedCounterConfig::default(),
    )
    .unwrap();
    let ctx = CallContext::new();

    counter.increment(&ctx, "noisy").await.unwrap();
    assert_eq!(counter.count(&ctx, "noisy").await.unwrap(), 1);
}

#[tokio::test]
async fn test_counter_without_cache_reads_the_store() {
    init_test_tracing();
    let store = Arc::new(CountingStore::new(Arc::new(MemoryStore::new())));
    let counter = ShardedCounter::new(
        Arc::clone(&store) as Arc<dyn Store>,
        None,
        ShardedCounterConfig::default(),
    )
    .unwrap();
    let ctx = CallContext::new();

    counter.increment(&ctx, "plain").await.unwrap();
    store.reset();
    assert_eq!(counter.count(&ctx, "plain").await.unwrap(), 1);
    assert_eq!(counter.count(&ctx, "plain").await.unwrap(), 1);
    assert_eq!(store.calls().run_query, 2);
}

#[tokio::test]
async fn test_namespaced_counters_are_isolated() {
    init_test_tracing();
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
    let tenant = ShardedCounter::new(
        Arc::clone(&store),
        Some(Arc::clone(&cache)),
        ShardedCounterConfig::default().with_namespace("tenant-a"),
    )
    .unwrap();
    let global =
        ShardedCounter::new(store, Some(cache), ShardedCounterConfig::default()).unwrap();
    let ctx = CallContext::new();

    tenant.increment(&ctx, "visits").await.unwrap();
    tenant.increment(&ctx, "visits").await.unwrap();
    global.increment(&ctx, "visits").await.unwrap();

    assert_eq!(tenant.cache_key("visits"), "counter.tenant-a.CounterTotal.visits");
    assert_eq!(tenant.count(&ctx, "visits").await.unwrap(), 2);
    assert_eq!(global.count(&ctx, "visits").await.unwrap(), 1);
}

#[tokio::test]
async fn test_dotted_key_does_not_share_a_namespaced_total() {
    init_test_tracing();
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
    let plain = ShardedCounter::new(
        Arc::clone(&store),
        Some(Arc::clone(&cache)),
        ShardedCounterConfig::default(),
    )
    .unwrap();
    let tenant = ShardedCounter::new(
        store,
        Some(cache),
        ShardedCounterConfig::default().with_namespace("t1"),
    )
    .unwrap();
    let ctx = CallContext::new();

    assert_ne!(plain.cache_key("t1.hits"), tenant.cache_key("hits"));

    for _ in 0..5 {
        plain.increment(&ctx, "t1.hits").await.unwrap();
    }
    tenant.increment(&ctx, "hits").await.unwrap();

    assert_eq!(plain.count(&ctx, "t1.hits").await.unwrap(), 5);
    assert_eq!(tenant.count(&ctx, "hits").await.unwrap(), 1);

    // Bumps land on each counter's own cached total.
    plain.increment(&ctx, "t1.hits").await.unwrap();
    tenant.increment(&ctx, "hits").await.unwrap();
    assert_eq!(plain.count(&ctx, "t1.hits").await.unwrap(), 6);
    assert_eq!(tenant.count(&ctx, "hits").await.unwrap(), 2);
}

#[tokio::test]
async fn test_empty_key_is_rejected() {
    let (counter, _, _) = counter_with(ShardedCounterConfig::default());
    let err = counter.increment(&CallContext::new(), "").await.unwrap_err();
    assert!(matches!(
        err,
        EntError::Validation(ValidationError::InvalidValue { .. })
    ));
}

#[tokio::test]
async fn test_cancelled_increment_writes_nothing() {
    let (counter, store, _) = counter_with(ShardedCounterConfig::default());
    let ctx = CallContext::new();
    ctx.cancel();

    assert!(counter.increment(&ctx, "late").await.is_err());
    assert!(store.is_empty());
}

#[test]
fn test_invalid_config_is_rejected() {
    let result = ShardedCounter::new(
        Arc::new(MemoryStore::new()),
        None,
        ShardedCounterConfig::default().with_num_shards(0),
    );
    assert!(matches!(result, Err(EntError::Config(_))));
}

#[test]
fn test_shard_entity_names() {
    let shard = Shard::new("views", 7);
    assert_eq!(shard.key, "views.shard.7");
    assert_eq!(shard.counter_key, "views");
}
