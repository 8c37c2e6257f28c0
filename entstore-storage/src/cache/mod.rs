//! Look-aside cache contract and an in-memory backend.
//!
//! The cache is never the source of truth. Entity stores treat every failure
//! reported here as a miss and log it.

pub mod memory;
pub mod traits;

pub use memory::MemoryCache;
pub use traits::{Cache, CacheEntry, CacheLookup, CacheStats};
