//! Backing store contract and an in-memory implementation.

pub mod memory;
pub mod traits;

pub use memory::{MemoryStore, MemoryStoreConfig};
pub use traits::{Lookup, QueryIterator, QueryRow, Store, Transaction, TransactionBody};
