//! Error types for entstore operations

use crate::MultiError;
use thiserror::Error;

/// Cancellation and deadline signals raised at an I/O boundary.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Deadline exceeded")]
    DeadlineExceeded,
}

/// Faults detected before any I/O happens. Never partially applied.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Too many keys in one batch: {given} given, limit is {limit}")]
    TooManyKeys { given: usize, limit: usize },

    #[error("Incomplete key for kind {kind}: identifier is empty")]
    IncompleteKey { kind: String },

    #[error("Key kind mismatch: expected {expected}, got {actual}")]
    KindMismatch { expected: String, actual: String },

    #[error("Query is keys-only and cannot produce entities")]
    KeysOnlyQuery,

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Backing store errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    /// Absent entity. A signal, not a failure.
    #[error("No such entity")]
    NoSuchEntity,

    #[error("Store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Transaction failed after {attempts} attempts due to concurrent modification")]
    ConcurrentTransaction { attempts: u32 },

    #[error("Transaction aborted: {reason}")]
    TransactionAborted { reason: String },

    #[error("Invalid cursor: {reason}")]
    InvalidCursor { reason: String },

    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("Store lock poisoned")]
    LockPoisoned,

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("{0}")]
    Multi(MultiError<StoreError>),
}

impl StoreError {
    /// Whether the operation itself failed, as opposed to keys simply being absent.
    ///
    /// A multi-key result that only reports missing entities is not a failure.
    pub fn is_failure(&self) -> bool {
        match self {
            StoreError::NoSuchEntity => false,
            StoreError::Multi(errs) => errs.errors().any(|(_, e)| e.is_failure()),
            _ => true,
        }
    }
}

/// Look-aside cache errors. Never fatal to entity operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache miss")]
    Miss,

    #[error("Cache unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Cached value at {key} is not a number")]
    NotANumber { key: String },

    #[error("Cache lock poisoned")]
    LockPoisoned,

    #[error(transparent)]
    Context(#[from] ContextError),
}

impl CacheError {
    pub fn is_miss(&self) -> bool {
        matches!(self, CacheError::Miss)
    }
}

/// Entity (de)serialization errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Failed to encode {kind}: {reason}")]
    Encode { kind: String, reason: String },

    #[error("Failed to decode {kind}: {reason}")]
    Decode { kind: String, reason: String },

    #[error("Entity of kind {kind} does not serialize to a property map")]
    NotAnObject { kind: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Failures raised by per-kind save hooks.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HookError {
    #[error("Hook rejected {kind}: {reason}")]
    Rejected { kind: String, reason: String },
}

/// Master error type for all entstore errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EntError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Hook error: {0}")]
    Hook(#[from] HookError),

    #[error("{0}")]
    Multi(MultiError<EntError>),

    #[error("Deleted {deleted} entities before failing: {source}")]
    PartialDelete {
        deleted: usize,
        source: Box<EntError>,
    },
}

impl EntError {
    pub fn is_validation(&self) -> bool {
        matches!(self, EntError::Validation(_))
    }

    /// Number of entities removed before a matched delete stopped, if this error
    /// came from one.
    pub fn deleted_before_failure(&self) -> Option<usize> {
        match self {
            EntError::PartialDelete { deleted, .. } => Some(*deleted),
            _ => None,
        }
    }
}

impl From<ContextError> for EntError {
    fn from(err: ContextError) -> Self {
        EntError::Store(StoreError::Context(err))
    }
}

impl From<MultiError<EntError>> for EntError {
    fn from(errs: MultiError<EntError>) -> Self {
        EntError::Multi(errs)
    }
}

/// Result type for entstore operations.
pub type EntResult<T> = Result<T, EntError>;

/// Result type for Store contract operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for Cache contract operations.
pub type CacheResult<T> = Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let err = StoreError::Unavailable {
            reason: "connection reset".to_string(),
        };
        assert!(format!("{}", err).contains("connection reset"));
    }

    #[test]
    fn test_ent_error_from_validation() {
        let err: EntError = ValidationError::TooManyKeys {
            given: 201,
            limit: 200,
        }
        .into();
        assert!(err.is_validation());
        assert!(format!("{}", err).contains("201 given"));
    }

    #[test]
    fn test_absent_is_not_failure() {
        assert!(!StoreError::NoSuchEntity.is_failure());
        assert!(StoreError::LockPoisoned.is_failure());
    }

    #[test]
    fn test_multi_of_absent_is_not_failure() {
        let mut errs = MultiError::new(3);
        errs.set(0, StoreError::NoSuchEntity);
        errs.set(2, StoreError::NoSuchEntity);
        assert!(!StoreError::Multi(errs).is_failure());
    }

    #[test]
    fn test_multi_with_real_failure_is_failure() {
        let mut errs = MultiError::new(3);
        errs.set(0, StoreError::NoSuchEntity);
        errs.set(1, StoreError::Unavailable {
            reason: "timeout".to_string(),
        });
        assert!(StoreError::Multi(errs).is_failure());
    }

    #[test]
    fn test_context_error_converts_to_store() {
        let err: EntError = ContextError::Cancelled.into();
        assert_eq!(err, EntError::Store(StoreError::Context(ContextError::Cancelled)));
    }

    #[test]
    fn test_partial_delete_reports_count() {
        let err = EntError::PartialDelete {
            deleted: 390,
            source: Box::new(EntError::Store(StoreError::LockPoisoned)),
        };
        assert_eq!(err.deleted_before_failure(), Some(390));
        assert!(format!("{}", err).starts_with("Deleted 390 entities"));
    }

    #[test]
    fn test_cache_miss_predicate() {
        assert!(CacheError::Miss.is_miss());
        assert!(!CacheError::LockPoisoned.is_miss());
    }
}
