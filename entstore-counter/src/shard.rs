//! Persisted counter entities.

use chrono::{DateTime, Utc};
use entstore_core::{Entity, Identifier};
use serde::{Deserialize, Serialize};

/// Shard layout of one counter. Created on first increment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterConfig {
    pub key: String,
    pub num_shards: u32,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl CounterConfig {
    pub fn new(key: impl Into<String>, num_shards: u32) -> Self {
        Self {
            key: key.into(),
            num_shards,
            updated_at: Some(Utc::now()),
        }
    }
}

impl Entity for CounterConfig {
    const KIND: &'static str = "CounterConfig";

    fn identifier(&self) -> Identifier {
        Identifier::Name(self.key.clone())
    }

    fn set_identifier(&mut self, identifier: Identifier) {
        self.key = identifier.to_string();
    }

    fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = Some(at);
    }
}

/// One independently written part of a counter's total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shard {
    pub key: String,
    pub counter_key: String,
    pub count: i64,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Shard {
    pub fn new(counter_key: &str, index: u32) -> Self {
        Self {
            key: shard_name(counter_key, index),
            counter_key: counter_key.to_string(),
            count: 0,
            updated_at: None,
        }
    }
}

impl Entity for Shard {
    const KIND: &'static str = "CounterShard";

    fn identifier(&self) -> Identifier {
        Identifier::Name(self.key.clone())
    }

    fn set_identifier(&mut self, identifier: Identifier) {
        self.key = identifier.to_string();
    }

    fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = Some(at);
    }
}

/// Store identifier of shard `index` of `counter_key`.
pub fn shard_name(counter_key: &str, index: u32) -> String {
    format!("{}.shard.{}", counter_key, index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_name() {
        assert_eq!(shard_name("page-views", 3), "page-views.shard.3");
        let shard = Shard::new("page-views", 3);
        assert_eq!(shard.identifier(), Identifier::Name("page-views.shard.3".to_string()));
        assert_eq!(shard.count, 0);
    }
}
