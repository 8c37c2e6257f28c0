//! Whole-store maintenance: wipe every entity in every namespace.
//!
//! Used to reset test environments. Namespaces are purged by a bounded pool of
//! workers and every worker's error is collected.

use std::sync::Arc;

use entstore_core::{
    CallContext, EntError, EntResult, MultiError, QuerySpec, StoreError, DEFAULT_BATCH_LIMIT,
};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::cache::Cache;
use crate::store::Store;

/// Settings for [`purge_all`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurgeOptions {
    /// Namespaces purged at the same time.
    pub concurrency: usize,
    /// Keys deleted per store call.
    pub batch_size: usize,
}

impl Default for PurgeOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            batch_size: DEFAULT_BATCH_LIMIT,
        }
    }
}

impl PurgeOptions {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
}

/// Flush the cache and delete every entity of every kind in every namespace.
///
/// Returns the number of deleted entities. When some namespaces fail the
/// others are still purged and the failures come back as
/// [`EntError::Multi`], one slot per namespace.
pub async fn purge_all(
    ctx: &CallContext,
    store: Arc<dyn Store>,
    cache: Option<Arc<dyn Cache>>,
    options: PurgeOptions,
) -> EntResult<usize> {
    if let Some(cache) = &cache {
        if let Err(e) = cache.flush(ctx).await {
            warn!(target: "entstore::maintenance", error = %e, "cache flush failed");
        }
    }

    let namespaces = store.namespaces(ctx).await?;
    let permits = Arc::new(Semaphore::new(options.concurrency.max(1)));
    let batch_size = options.batch_size.max(1);
    let mut workers = JoinSet::new();

    for (index, namespace) in namespaces.iter().cloned().enumerate() {
        let store = Arc::clone(&store);
        let permits = Arc::clone(&permits);
        let ctx = ctx.clone();
        workers.spawn(async move {
            let result = match permits.acquire_owned().await {
                Ok(_permit) => purge_namespace(&ctx, store.as_ref(), namespace.as_deref(), batch_size).await,
                Err(e) => Err(StoreError::Unavailable {
                    reason: format!("worker pool closed: {}", e),
                }
                .into()),
            };
            (index, result)
        });
    }

    let mut errors: MultiError<EntError> = MultiError::new(namespaces.len());
    let mut deleted = 0usize;
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok((_, Ok(count))) => deleted += count,
            Ok((index, Err(e))) => {
                warn!(
                    target: "entstore::maintenance",
                    namespace = namespaces[index].as_deref().unwrap_or(""),
                    error = %e,
                    "namespace purge failed"
                );
                errors.set(index, e);
            }
            Err(e) => errors.push(Some(
                StoreError::Unavailable {
                    reason: format!("purge worker crashed: {}", e),
                }
                .into(),
            )),
        }
    }

    debug!(
        target: "entstore::maintenance",
        namespaces = namespaces.len(),
        deleted,
        failed = errors.error_count(),
        "purge finished"
    );
    errors.into_result()?;
    Ok(deleted)
}

async fn purge_namespace(
    ctx: &CallContext,
    store: &dyn Store,
    namespace: Option<&str>,
    batch_size: usize,
) -> EntResult<usize> {
    let mut deleted = 0usize;
    for kind in store.kinds(ctx, namespace).await? {
        let spec = QuerySpec::new(kind)
            .namespace(namespace)
            .keys_only()
            .limit(batch_size);
        loop {
            let mut rows = store.run_query(ctx, &spec).await?;
            let mut keys = Vec::with_capacity(batch_size);
            while let Some(row) = rows.next(ctx).await? {
                keys.push(row.key);
            }
            if keys.is_empty() {
                break;
            }
            store.delete_multi(ctx, &keys).await?;
            deleted += keys.len();
        }
    }
    Ok(deleted)
}
