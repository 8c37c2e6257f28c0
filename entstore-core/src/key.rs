//! Backing-store keys and their cache-key rendering.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::fmt;

/// Prefix of every cache key derived from a store key.
pub const DEFAULT_CACHE_KEY_PREFIX: &str = "datastore";

/// Longest cache key accepted verbatim. Longer keys are digested.
pub const MAX_CACHE_KEY_LEN: usize = 250;

/// Longest prefix for which a digested cache key still fits
/// [`MAX_CACHE_KEY_LEN`]: `<prefix>.sha256.<64 hex digits>`.
pub const MAX_CACHE_KEY_PREFIX_LEN: usize = MAX_CACHE_KEY_LEN - ".sha256.".len() - 64;

// ============================================================================
// IDENTIFIER
// ============================================================================

/// The identifying part of a key: a numeric id or a string name.
///
/// Numeric ids sort before names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Identifier {
    Id(i64),
    Name(String),
}

impl Identifier {
    /// Zero ids and empty names are placeholders awaiting assignment.
    pub fn is_complete(&self) -> bool {
        match self {
            Identifier::Id(id) => *id != 0,
            Identifier::Name(name) => !name.is_empty(),
        }
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            Identifier::Name(name) => Some(name),
            Identifier::Id(_) => None,
        }
    }

    pub fn as_id(&self) -> Option<i64> {
        match self {
            Identifier::Id(id) => Some(*id),
            Identifier::Name(_) => None,
        }
    }
}

impl Default for Identifier {
    fn default() -> Self {
        Identifier::Name(String::new())
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Id(id) => write!(f, "{}", id),
            Identifier::Name(name) => f.write_str(name),
        }
    }
}

impl From<&str> for Identifier {
    fn from(name: &str) -> Self {
        Identifier::Name(name.to_string())
    }
}

impl From<String> for Identifier {
    fn from(name: String) -> Self {
        Identifier::Name(name)
    }
}

impl From<i64> for Identifier {
    fn from(id: i64) -> Self {
        Identifier::Id(id)
    }
}

// ============================================================================
// KEY
// ============================================================================

/// A complete address of one entity in the backing store.
///
/// Keys are immutable: the builder-style methods return a new key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Key {
    kind: String,
    identifier: Identifier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent: Option<Box<Key>>,
}

impl Key {
    pub fn new(kind: impl Into<String>, identifier: impl Into<Identifier>) -> Self {
        Self {
            kind: kind.into(),
            identifier: identifier.into(),
            namespace: None,
            parent: None,
        }
    }

    /// Same key in another namespace. Empty namespaces mean the default one.
    pub fn in_namespace(mut self, namespace: Option<&str>) -> Self {
        self.namespace = namespace.filter(|ns| !ns.is_empty()).map(str::to_string);
        self
    }

    /// Same key under `parent`.
    pub fn with_parent(mut self, parent: Key) -> Self {
        self.parent = Some(Box::new(parent));
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn parent(&self) -> Option<&Key> {
        self.parent.as_deref()
    }

    pub fn is_complete(&self) -> bool {
        self.identifier.is_complete()
    }

    /// Whether `ancestor` is this key or one of its parents.
    pub fn has_ancestor(&self, ancestor: &Key) -> bool {
        let mut current = Some(self);
        while let Some(key) = current {
            if key == ancestor {
                return true;
            }
            current = key.parent();
        }
        false
    }

    /// Path elements from the root down to this key.
    pub fn path(&self) -> Vec<(&str, &Identifier)> {
        self.lineage()
            .into_iter()
            .map(|key| (key.kind.as_str(), &key.identifier))
            .collect()
    }

    /// This key and its parents, root first.
    fn lineage(&self) -> Vec<&Key> {
        let mut lineage = Vec::new();
        let mut current = Some(self);
        while let Some(key) = current {
            lineage.push(key);
            current = key.parent();
        }
        lineage.reverse();
        lineage
    }
}

/// Orders by namespace, then path. Every element's namespace takes part so the
/// ordering agrees with equality.
impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        self.namespace.cmp(&other.namespace).then_with(|| {
            let (left, right) = (self.lineage(), other.lineage());
            for (a, b) in left.iter().zip(right.iter()) {
                let ordering = a
                    .kind
                    .cmp(&b.kind)
                    .then_with(|| a.identifier.cmp(&b.identifier))
                    .then_with(|| a.namespace.cmp(&b.namespace));
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            left.len().cmp(&right.len())
        })
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ns) = &self.namespace {
            write!(f, "{}:", ns)?;
        }
        for (i, (kind, identifier)) in self.path().into_iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{}({})", kind, identifier)?;
        }
        Ok(())
    }
}

/// Normalize identifier-like inputs into a key of a given kind.
///
/// A [`Key`] input passes through unchanged, whatever kind or namespace it
/// carries.
pub trait IntoKey {
    fn into_key(self, kind: &str, namespace: Option<&str>) -> Key;
}

impl IntoKey for Key {
    fn into_key(self, _kind: &str, _namespace: Option<&str>) -> Key {
        self
    }
}

impl IntoKey for &Key {
    fn into_key(self, _kind: &str, _namespace: Option<&str>) -> Key {
        self.clone()
    }
}

impl IntoKey for Identifier {
    fn into_key(self, kind: &str, namespace: Option<&str>) -> Key {
        Key::new(kind, self).in_namespace(namespace)
    }
}

impl IntoKey for &str {
    fn into_key(self, kind: &str, namespace: Option<&str>) -> Key {
        Identifier::from(self).into_key(kind, namespace)
    }
}

impl IntoKey for String {
    fn into_key(self, kind: &str, namespace: Option<&str>) -> Key {
        Identifier::from(self).into_key(kind, namespace)
    }
}

impl IntoKey for i64 {
    fn into_key(self, kind: &str, namespace: Option<&str>) -> Key {
        Identifier::from(self).into_key(kind, namespace)
    }
}

// ============================================================================
// KEY NAMER
// ============================================================================

/// Derives store keys and the matching look-aside cache keys.
///
/// Cache keys have the shape `<prefix>.<namespace>.<path>` where the path is
/// `Kind.ident` segments joined by `/`. Names are percent-escaped and numeric
/// ids are written as `#<n>`, so distinct keys never render the same string.
/// Renderings longer than [`MAX_CACHE_KEY_LEN`] are replaced by
/// `<prefix>.sha256.<hex digest>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyNamer {
    prefix: String,
}

impl KeyNamer {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn store_key(
        &self,
        kind: &str,
        identifier: impl Into<Identifier>,
        namespace: Option<&str>,
    ) -> Key {
        Key::new(kind, identifier).in_namespace(namespace)
    }

    pub fn cache_key(&self, key: &Key) -> String {
        let mut out = String::with_capacity(64);
        out.push_str(&self.prefix);
        out.push('.');
        if let Some(ns) = key.namespace() {
            escape_into(&mut out, ns);
        }
        out.push('.');
        for (i, element) in key.lineage().into_iter().enumerate() {
            if i > 0 {
                out.push('/');
            }
            escape_into(&mut out, &element.kind);
            out.push('.');
            match &element.identifier {
                Identifier::Id(id) => {
                    out.push('#');
                    out.push_str(&id.to_string());
                }
                Identifier::Name(name) => escape_into(&mut out, name),
            }
            // Ancestors living in another namespace carry it after `@`.
            if element.namespace != key.namespace {
                out.push('@');
                escape_into(&mut out, element.namespace.as_deref().unwrap_or(""));
            }
        }

        if out.len() <= MAX_CACHE_KEY_LEN {
            return out;
        }
        let digest = Sha256::digest(out.as_bytes());
        format!("{}.sha256.{}", self.prefix, hex::encode(digest))
    }

    pub fn cache_keys(&self, keys: &[Key]) -> Vec<String> {
        keys.iter().map(|k| self.cache_key(k)).collect()
    }
}

impl Default for KeyNamer {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_KEY_PREFIX)
    }
}

fn escape_into(out: &mut String, raw: &str) {
    for c in raw.chars() {
        match c {
            '.' => out.push_str("%2E"),
            '/' => out.push_str("%2F"),
            '%' => out.push_str("%25"),
            '#' => out.push_str("%23"),
            '@' => out.push_str("%40"),
            c => out.push(c),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_identifier() -> impl Strategy<Value = Identifier> {
        prop_oneof![
            any::<i64>().prop_map(Identifier::Id),
            "[a-z0-9./%#]{0,12}".prop_map(Identifier::Name),
        ]
    }

    fn arb_key() -> impl Strategy<Value = Key> {
        (
            "[A-Za-z.]{1,8}",
            arb_identifier(),
            proptest::option::of("[a-z.]{1,6}"),
        )
            .prop_map(|(kind, id, ns)| Key::new(kind, id).in_namespace(ns.as_deref()))
    }

    fn arb_nested_key() -> impl Strategy<Value = Key> {
        (arb_key(), proptest::option::of(arb_key())).prop_map(|(key, parent)| match parent {
            Some(parent) => key.with_parent(parent),
            None => key,
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_cache_key_is_deterministic(key in arb_key()) {
            let namer = KeyNamer::default();
            prop_assert_eq!(namer.cache_key(&key), namer.cache_key(&key.clone()));
        }

        #[test]
        fn prop_distinct_keys_have_distinct_cache_keys(a in arb_nested_key(), b in arb_nested_key()) {
            let namer = KeyNamer::default();
            if a != b {
                prop_assert_ne!(namer.cache_key(&a), namer.cache_key(&b));
            } else {
                prop_assert_eq!(namer.cache_key(&a), namer.cache_key(&b));
            }
        }

        #[test]
        fn prop_ordering_agrees_with_equality(a in arb_nested_key(), b in arb_nested_key()) {
            prop_assert_eq!(a == b, a.cmp(&b) == Ordering::Equal);
            prop_assert_eq!(a.cmp(&b), b.cmp(&a).reverse());
        }
    }
}
