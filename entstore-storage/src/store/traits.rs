//! Store contract: batched reads and writes, queries and transactions.

use async_trait::async_trait;
use entstore_core::{CallContext, Cursor, EntResult, Key, Properties, QuerySpec, StoreError, StoreResult};

/// Per-key outcome of a batched store read.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Found(Properties),
    Absent,
    /// Per-key error. Use [`StoreError::is_failure`] to tell a real failure
    /// from an absence reported as an error.
    Failed(StoreError),
}

/// One row produced by a query. Keys-only queries carry no properties.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRow {
    pub key: Key,
    pub properties: Option<Properties>,
}

/// Lazy, forward-only query results.
#[async_trait]
pub trait QueryIterator: Send {
    async fn next(&mut self, ctx: &CallContext) -> StoreResult<Option<QueryRow>>;

    /// Position after the last row returned, or the query start if none was.
    fn cursor(&self) -> StoreResult<Cursor>;
}

/// Reads and buffered writes inside one store transaction.
#[async_trait]
pub trait Transaction: Send + Sync {
    async fn get(&self, key: &Key) -> StoreResult<Option<Properties>>;

    async fn put(&self, key: Key, properties: Properties) -> StoreResult<()>;

    async fn delete(&self, key: &Key) -> StoreResult<()>;
}

/// Work executed atomically by [`Store::transaction`].
///
/// A store may run the body more than once when it retries a conflicting
/// commit, so the body must not have side effects outside `tx`.
#[async_trait]
pub trait TransactionBody: Send + Sync {
    async fn run(&self, tx: &dyn Transaction) -> EntResult<()>;
}

/// Authoritative batched key/document store.
#[async_trait]
pub trait Store: Send + Sync {
    /// One lookup per key, in input order. `Err` means the whole call failed.
    async fn get_multi(&self, ctx: &CallContext, keys: &[Key]) -> StoreResult<Vec<Lookup>>;

    async fn put_multi(
        &self,
        ctx: &CallContext,
        keys: &[Key],
        properties: Vec<Properties>,
    ) -> StoreResult<()>;

    /// Deleting an absent key is not an error.
    async fn delete_multi(&self, ctx: &CallContext, keys: &[Key]) -> StoreResult<()>;

    async fn run_query(
        &self,
        ctx: &CallContext,
        spec: &QuerySpec,
    ) -> StoreResult<Box<dyn QueryIterator>>;

    /// Run `body` atomically. Body errors are returned unchanged.
    async fn transaction(&self, ctx: &CallContext, body: &dyn TransactionBody) -> EntResult<()>;

    /// Namespaces holding at least one entity. `None` is the default namespace.
    async fn namespaces(&self, ctx: &CallContext) -> StoreResult<Vec<Option<String>>>;

    async fn kinds(&self, ctx: &CallContext, namespace: Option<&str>) -> StoreResult<Vec<String>>;
}
