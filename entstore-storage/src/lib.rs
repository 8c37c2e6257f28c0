//! entstore storage - cache-aside batched entity store
//!
//! Defines the Store and Cache contracts consumed by the entity store, ships
//! in-memory implementations of both, and builds [`BatchedEntityStore`] and
//! its typed [`Query`] on top of them.

pub mod cache;
pub mod entity_store;
pub mod maintenance;
pub mod query;
pub mod store;

pub use cache::{Cache, CacheEntry, CacheLookup, CacheStats, MemoryCache};
pub use entity_store::BatchedEntityStore;
pub use maintenance::{purge_all, PurgeOptions};
pub use query::{EntityIterator, Query};
pub use store::{
    Lookup, MemoryStore, MemoryStoreConfig, QueryIterator, QueryRow, Store, Transaction,
    TransactionBody,
};
