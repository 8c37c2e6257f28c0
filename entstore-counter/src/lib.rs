//! entstore counter - sharded counters
//!
//! Counters that absorb high write volume by spreading increments across
//! shards, each updated inside a store transaction, with totals cached for a
//! bounded time.

mod config;
mod counter;
mod shard;

pub use config::{
    ShardedCounterConfig, DEFAULT_COUNTER_CACHE_PREFIX, DEFAULT_COUNT_CACHE_TTL, DEFAULT_NUM_SHARDS,
};
pub use counter::ShardedCounter;
pub use shard::{shard_name, CounterConfig, Shard};
