//! Entity contract and the per-kind strategy objects plugged into a store.

use crate::{HookError, Identifier, Key};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

/// A record persisted under one key of a fixed kind.
pub trait Entity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Logical collection name in the backing store.
    const KIND: &'static str;

    fn identifier(&self) -> Identifier;

    fn set_identifier(&mut self, identifier: Identifier);

    /// Owning entity, used for ancestor queries.
    fn parent(&self) -> Option<Key> {
        None
    }

    /// Stamp the update timestamp. Called on every put unless disabled.
    fn touch(&mut self, _at: DateTime<Utc>) {}
}

/// Kind-specific behavior injected into a store.
///
/// Every method has a no-op default so a kind only overrides what it needs.
pub trait EntityHooks<T: Entity>: Send + Sync {
    /// Give the entity an identifier before its key is derived.
    fn assign_identifier(&self, _entity: &mut T) -> Result<(), HookError> {
        Ok(())
    }

    /// Runs before anything is written. Any failure aborts the whole batch.
    fn before_save(&self, _entity: &mut T) -> Result<(), HookError> {
        Ok(())
    }

    /// Runs after the write and cache invalidation succeeded.
    fn after_save(&self, _entity: &T) -> Result<(), HookError> {
        Ok(())
    }

    /// Value reported for an absent key when defaults are enabled.
    fn default_value(&self, _key: &Key) -> Option<T> {
        None
    }
}

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl<T: Entity> EntityHooks<T> for NoHooks {}

/// Assigns a time-ordered UUIDv7 name to entities that have no identifier yet.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidIdentifiers;

impl<T: Entity> EntityHooks<T> for UuidIdentifiers {
    fn assign_identifier(&self, entity: &mut T) -> Result<(), HookError> {
        if !entity.identifier().is_complete() {
            entity.set_identifier(Identifier::Name(Uuid::now_v7().to_string()));
        }
        Ok(())
    }
}

/// Field-level merge policy for conditional writes.
pub trait Replacer<T>: Send + Sync {
    fn replace(&self, existing: T, incoming: T) -> T;
}

impl<T, F> Replacer<T> for F
where
    F: Fn(T, T) -> T + Send + Sync,
{
    fn replace(&self, existing: T, incoming: T) -> T {
        self(existing, incoming)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: String,
        body: String,
    }

    impl Entity for Note {
        const KIND: &'static str = "Note";

        fn identifier(&self) -> Identifier {
            Identifier::Name(self.id.clone())
        }

        fn set_identifier(&mut self, identifier: Identifier) {
            self.id = identifier.to_string();
        }
    }

    #[test]
    fn test_uuid_hook_fills_missing_identifier() {
        let mut note = Note {
            id: String::new(),
            body: "x".to_string(),
        };
        EntityHooks::<Note>::assign_identifier(&UuidIdentifiers, &mut note).unwrap();
        assert!(Uuid::parse_str(&note.id).is_ok());
    }

    #[test]
    fn test_uuid_hook_keeps_existing_identifier() {
        let mut note = Note {
            id: "keep".to_string(),
            body: "x".to_string(),
        };
        EntityHooks::<Note>::assign_identifier(&UuidIdentifiers, &mut note).unwrap();
        assert_eq!(note.id, "keep");
    }

    #[test]
    fn test_closure_replacer() {
        let keep_body = |existing: Note, incoming: Note| Note {
            id: incoming.id,
            body: if incoming.body.is_empty() {
                existing.body
            } else {
                incoming.body
            },
        };
        let merged = keep_body.replace(
            Note {
                id: "a".to_string(),
                body: "old".to_string(),
            },
            Note {
                id: "a".to_string(),
                body: String::new(),
            },
        );
        assert_eq!(merged.body, "old");
    }
}
