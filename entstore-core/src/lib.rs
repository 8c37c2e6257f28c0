//! entstore core types
//!
//! Keys and key naming, the entity contract with its per-kind hooks, the codec
//! contract, query shapes, call contexts, configuration and the error
//! taxonomy shared by the storage and counter crates.

mod codec;
mod config;
mod context;
mod entity;
mod error;
mod key;
mod multi_error;
mod query;

pub use codec::{EntityCodec, JsonCodec, Properties};
pub use config::{EntityStoreConfig, DEFAULT_BATCH_LIMIT, DEFAULT_DELETE_MATCHED_SLACK};
pub use context::CallContext;
pub use entity::{Entity, EntityHooks, NoHooks, Replacer, UuidIdentifiers};
pub use error::{
    CacheError, CacheResult, CodecError, ConfigError, ContextError, EntError, EntResult,
    HookError, StoreError, StoreResult, ValidationError,
};
pub use key::{
    Identifier, IntoKey, Key, KeyNamer, DEFAULT_CACHE_KEY_PREFIX, MAX_CACHE_KEY_LEN,
    MAX_CACHE_KEY_PREFIX_LEN,
};
pub use multi_error::MultiError;
pub use query::{Cursor, Direction, Filter, FilterOp, Order, Page, QuerySpec, QueryValue};

pub use tokio_util::sync::CancellationToken;
