//! Typed queries and page-at-a-time iteration.

use std::sync::Arc;

use entstore_core::{
    CallContext, Cursor, EntError, EntResult, Entity, EntityCodec, FilterOp, Key, Page, QuerySpec,
    QueryValue, ValidationError,
};
use serde_json::Value;
use tracing::debug;

use crate::entity_store::BatchedEntityStore;
use crate::store::QueryIterator;

/// Query over one entity kind, bound to the store that runs it.
///
/// Builder methods consume and return the query, so a base query can be cloned
/// and specialized per page.
#[derive(Debug, Clone)]
pub struct Query<T: Entity> {
    ents: BatchedEntityStore<T>,
    spec: QuerySpec,
    via_keys: bool,
}

impl<T: Entity> Query<T> {
    pub(crate) fn new(ents: BatchedEntityStore<T>) -> Self {
        let spec = QuerySpec::new(T::KIND).namespace(ents.config.namespace.as_deref());
        Self {
            ents,
            spec,
            via_keys: false,
        }
    }

    pub fn spec(&self) -> &QuerySpec {
        &self.spec
    }

    pub fn ancestor(mut self, ancestor: Key) -> Self {
        self.spec = self.spec.ancestor(ancestor);
        self
    }

    pub fn filter(mut self, field: &str, op: FilterOp, value: QueryValue) -> Self {
        self.spec = self.spec.filter(field, op, value);
        self
    }

    pub fn eq(self, field: &str, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Eq, QueryValue::of(value))
    }

    pub fn lt(self, field: &str, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Lt, QueryValue::of(value))
    }

    pub fn le(self, field: &str, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Le, QueryValue::of(value))
    }

    pub fn gt(self, field: &str, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Gt, QueryValue::of(value))
    }

    pub fn ge(self, field: &str, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Ge, QueryValue::of(value))
    }

    pub fn ne(self, field: &str, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Ne, QueryValue::of(value))
    }

    pub fn asc(mut self, field: &str) -> Self {
        self.spec = self.spec.asc(field);
        self
    }

    pub fn desc(mut self, field: &str) -> Self {
        self.spec = self.spec.desc(field);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.spec = self.spec.limit(limit);
        self
    }

    /// Resume after the position `cursor` marks. `None` leaves the query as is.
    pub fn start(mut self, cursor: Option<Cursor>) -> Self {
        self.spec.start = cursor;
        self
    }

    pub fn end(mut self, cursor: Option<Cursor>) -> Self {
        self.spec.end = cursor;
        self
    }

    pub fn keys_only(mut self) -> Self {
        self.spec = self.spec.keys_only();
        self
    }

    /// Run keys-only and load entities through the cache-aware batched get.
    pub fn via_keys(mut self) -> Self {
        self.via_keys = true;
        self
    }

    // ========================================================================
    // EXECUTION
    // ========================================================================

    /// Open a lazy iterator over matching rows.
    pub async fn run(&self, ctx: &CallContext) -> EntResult<EntityIterator<T>> {
        debug!(target: "entstore::query", query = %self.spec, "run");
        let inner = self.ents.store.run_query(ctx, &self.spec).await?;
        Ok(EntityIterator {
            inner,
            codec: Arc::clone(&self.ents.codec),
            keys_only: self.spec.keys_only,
        })
    }

    /// Drain the query into one page.
    ///
    /// Keys-only queries fill `keys` and leave `data` empty. With
    /// [`Query::via_keys`], entities deleted between the key scan and the
    /// batched get are left out of both.
    pub async fn run_all(&self, ctx: &CallContext) -> EntResult<Page<T>> {
        if self.via_keys && !self.spec.keys_only {
            return self.run_all_via_keys(ctx).await;
        }
        self.drain(ctx).await
    }

    async fn drain(&self, ctx: &CallContext) -> EntResult<Page<T>> {
        let mut iter = self.run(ctx).await?;
        let mut page = Page {
            start_cursor: Some(iter.cursor()?),
            ..Page::default()
        };
        if self.spec.keys_only {
            while let Some(key) = iter.next_key(ctx).await? {
                page.keys.push(key);
            }
        } else {
            while let Some((key, entity)) = iter.next(ctx).await? {
                page.keys.push(key);
                page.data.push(entity);
            }
        }
        page.end_cursor = Some(iter.cursor()?);
        Ok(page)
    }

    async fn run_all_via_keys(&self, ctx: &CallContext) -> EntResult<Page<T>> {
        let keys_page = self.keys_query().drain(ctx).await?;
        let mut page = Page {
            start_cursor: keys_page.start_cursor,
            end_cursor: keys_page.end_cursor,
            ..Page::default()
        };

        for chunk in keys_page.keys.chunks(self.ents.config.batch_limit) {
            let entities = self.ents.get_multi(ctx, chunk).await?;
            for (key, entity) in chunk.iter().zip(entities) {
                if let Some(entity) = entity {
                    page.keys.push(key.clone());
                    page.data.push(entity);
                }
            }
        }
        Ok(page)
    }

    fn keys_query(&self) -> Self {
        Self {
            ents: self.ents.clone(),
            spec: self.spec.clone().keys_only(),
            via_keys: false,
        }
    }

    /// Keys of every matching row.
    pub async fn run_keys(&self, ctx: &CallContext) -> EntResult<Vec<Key>> {
        Ok(self.keys_query().drain(ctx).await?.keys)
    }

    /// First matching entity, if any.
    pub async fn get_one(&self, ctx: &CallContext) -> EntResult<Option<(Key, T)>> {
        if self.spec.keys_only {
            return Err(ValidationError::KeysOnlyQuery.into());
        }
        let mut one = self.clone();
        one.spec.limit = Some(1);
        let page = one.run_all(ctx).await?;
        Ok(page.keys.into_iter().zip(page.data).next())
    }

    /// Number of matching rows, honoring the limit.
    pub async fn count(&self, ctx: &CallContext) -> EntResult<usize> {
        let mut iter = self.keys_query().run(ctx).await?;
        let mut count = 0;
        while iter.next_key(ctx).await?.is_some() {
            count += 1;
        }
        Ok(count)
    }

    /// Delete every matching entity, one page of keys at a time.
    ///
    /// Pages are sized to stay below the batch limit and each page resumes at
    /// the previous page's end cursor. A failure stops the loop and reports how
    /// many entities were already deleted.
    pub async fn delete_matched(&self, ctx: &CallContext) -> EntResult<usize> {
        let mut query = self.keys_query().limit(self.ents.config.delete_page_size());
        let mut deleted = 0usize;

        loop {
            let page = match query.drain(ctx).await {
                Ok(page) => page,
                Err(e) => return Err(partial_delete(deleted, e)),
            };
            if page.keys.is_empty() {
                break;
            }
            if let Err(e) = self.ents.delete_multi(ctx, &page.keys).await {
                return Err(partial_delete(deleted, e));
            }
            deleted += page.keys.len();
            query = query.start(page.end_cursor);
        }

        debug!(target: "entstore::query", query = %self.spec, deleted, "delete matched");
        Ok(deleted)
    }
}

fn partial_delete(deleted: usize, source: EntError) -> EntError {
    EntError::PartialDelete {
        deleted,
        source: Box::new(source),
    }
}

/// Decoding iterator over query rows.
pub struct EntityIterator<T> {
    inner: Box<dyn QueryIterator>,
    codec: Arc<dyn EntityCodec<T>>,
    keys_only: bool,
}

impl<T> EntityIterator<T> {
    pub async fn next(&mut self, ctx: &CallContext) -> EntResult<Option<(Key, T)>> {
        if self.keys_only {
            return Err(ValidationError::KeysOnlyQuery.into());
        }
        let Some(row) = self.inner.next(ctx).await? else {
            return Ok(None);
        };
        let properties = row.properties.unwrap_or_default();
        let entity = self.codec.from_properties(properties)?;
        Ok(Some((row.key, entity)))
    }

    pub async fn next_key(&mut self, ctx: &CallContext) -> EntResult<Option<Key>> {
        Ok(self.inner.next(ctx).await?.map(|row| row.key))
    }

    /// Position of the iterator. Only take it before the first row or after
    /// the last one.
    pub fn cursor(&self) -> EntResult<Cursor> {
        Ok(self.inner.cursor()?)
    }
}
