//! Sharded counter configuration.

use entstore_core::{ConfigError, MAX_CACHE_KEY_PREFIX_LEN};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Shards created for a counter on its first increment.
pub const DEFAULT_NUM_SHARDS: u32 = 10;

/// How long a computed total stays in the cache.
pub const DEFAULT_COUNT_CACHE_TTL: Duration = Duration::from_secs(60);

pub const DEFAULT_COUNTER_CACHE_PREFIX: &str = "counter";

/// Settings of a `ShardedCounter`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardedCounterConfig {
    pub default_num_shards: u32,
    pub count_cache_ttl: Duration,
    pub cache_key_prefix: String,
    pub namespace: Option<String>,
}

impl Default for ShardedCounterConfig {
    fn default() -> Self {
        Self {
            default_num_shards: DEFAULT_NUM_SHARDS,
            count_cache_ttl: DEFAULT_COUNT_CACHE_TTL,
            cache_key_prefix: DEFAULT_COUNTER_CACHE_PREFIX.to_string(),
            namespace: None,
        }
    }
}

impl ShardedCounterConfig {
    pub fn with_num_shards(mut self, shards: u32) -> Self {
        self.default_num_shards = shards;
        self
    }

    pub fn with_count_cache_ttl(mut self, ttl: Duration) -> Self {
        self.count_cache_ttl = ttl;
        self
    }

    pub fn with_cache_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.cache_key_prefix = prefix.into();
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_num_shards == 0 {
            return Err(ConfigError::InvalidValue {
                field: "default_num_shards".to_string(),
                value: "0".to_string(),
                reason: "a counter needs at least one shard".to_string(),
            });
        }
        if self.count_cache_ttl.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "count_cache_ttl".to_string(),
                value: "0s".to_string(),
                reason: "cached totals must expire".to_string(),
            });
        }
        if self.cache_key_prefix.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "cache_key_prefix".to_string(),
                value: String::new(),
                reason: "cache_key_prefix must not be empty".to_string(),
            });
        }
        if self.cache_key_prefix.len() > MAX_CACHE_KEY_PREFIX_LEN {
            return Err(ConfigError::InvalidValue {
                field: "cache_key_prefix".to_string(),
                value: self.cache_key_prefix.clone(),
                reason: format!(
                    "cache_key_prefix must be at most {} bytes",
                    MAX_CACHE_KEY_PREFIX_LEN
                ),
            });
        }
        Ok(())
    }

    /// Load settings from `ENTSTORE_COUNTER_*` environment variables, falling
    /// back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            default_num_shards: std::env::var("ENTSTORE_COUNTER_NUM_SHARDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.default_num_shards),
            count_cache_ttl: std::env::var("ENTSTORE_COUNTER_CACHE_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.count_cache_ttl),
            cache_key_prefix: std::env::var("ENTSTORE_COUNTER_CACHE_PREFIX")
                .ok()
                .filter(|p| !p.is_empty())
                .unwrap_or(defaults.cache_key_prefix),
            namespace: std::env::var("ENTSTORE_NAMESPACE")
                .ok()
                .filter(|ns| !ns.is_empty())
                .or(defaults.namespace),
        }
    }
}
