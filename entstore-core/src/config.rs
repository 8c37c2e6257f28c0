//! Entity store configuration.

use crate::{ConfigError, DEFAULT_CACHE_KEY_PREFIX, MAX_CACHE_KEY_PREFIX_LEN};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Largest number of keys or entities accepted by one batched call.
pub const DEFAULT_BATCH_LIMIT: usize = 200;

/// Head-room kept below the batch limit by matched deletes.
pub const DEFAULT_DELETE_MATCHED_SLACK: usize = 5;

/// Settings of one `BatchedEntityStore`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityStoreConfig {
    pub batch_limit: usize,
    pub delete_matched_slack: usize,
    /// Namespace stamped on every key the store derives.
    pub namespace: Option<String>,
    /// TTL of repopulated cache entries. Zero means no expiry.
    pub cache_ttl: Duration,
    /// Bypass the look-aside cache entirely.
    pub no_cache: bool,
    pub no_timestamp_update: bool,
    /// Report the hook's default value for absent keys instead of `None`.
    pub use_default_if_absent: bool,
    pub cache_key_prefix: String,
}

impl Default for EntityStoreConfig {
    fn default() -> Self {
        Self {
            batch_limit: DEFAULT_BATCH_LIMIT,
            delete_matched_slack: DEFAULT_DELETE_MATCHED_SLACK,
            namespace: None,
            cache_ttl: Duration::ZERO,
            no_cache: false,
            no_timestamp_update: false,
            use_default_if_absent: false,
            cache_key_prefix: DEFAULT_CACHE_KEY_PREFIX.to_string(),
        }
    }
}

impl EntityStoreConfig {
    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit;
        self
    }

    pub fn with_delete_matched_slack(mut self, slack: usize) -> Self {
        self.delete_matched_slack = slack;
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.no_cache = true;
        self
    }

    pub fn without_timestamp_update(mut self) -> Self {
        self.no_timestamp_update = true;
        self
    }

    pub fn with_defaults_for_absent(mut self) -> Self {
        self.use_default_if_absent = true;
        self
    }

    pub fn with_cache_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.cache_key_prefix = prefix.into();
        self
    }

    /// Page size used by matched deletes.
    pub fn delete_page_size(&self) -> usize {
        self.batch_limit.saturating_sub(self.delete_matched_slack)
    }

    /// Check that the settings can be used together.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_limit == 0 {
            return Err(ConfigError::InvalidValue {
                field: "batch_limit".to_string(),
                value: self.batch_limit.to_string(),
                reason: "batch_limit must be greater than 0".to_string(),
            });
        }

        if self.delete_matched_slack >= self.batch_limit {
            return Err(ConfigError::InvalidValue {
                field: "delete_matched_slack".to_string(),
                value: self.delete_matched_slack.to_string(),
                reason: format!(
                    "delete_matched_slack must be smaller than batch_limit ({})",
                    self.batch_limit
                ),
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

        if matches!(self.namespace.as_deref(), Some("")) {
            return Err(ConfigError::InvalidValue {
                field: "namespace".to_string(),
                value: String::new(),
                reason: "use None for the default namespace".to_string(),
            });
        }

        Ok(())
    }

    /// Load settings from `ENTSTORE_*` environment variables, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            batch_limit: env_parse("ENTSTORE_BATCH_LIMIT").unwrap_or(defaults.batch_limit),
            delete_matched_slack: env_parse("ENTSTORE_DELETE_MATCHED_SLACK")
                .unwrap_or(defaults.delete_matched_slack),
            namespace: std::env::var("ENTSTORE_NAMESPACE")
                .ok()
                .filter(|ns| !ns.is_empty())
                .or(defaults.namespace),
            cache_ttl: env_parse::<u64>("ENTSTORE_CACHE_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.cache_ttl),
            no_cache: env_parse("ENTSTORE_NO_CACHE").unwrap_or(defaults.no_cache),
            no_timestamp_update: env_parse("ENTSTORE_NO_TIMESTAMP_UPDATE")
                .unwrap_or(defaults.no_timestamp_update),
            use_default_if_absent: env_parse("ENTSTORE_USE_DEFAULT_IF_ABSENT")
                .unwrap_or(defaults.use_default_if_absent),
            cache_key_prefix: std::env::var("ENTSTORE_CACHE_KEY_PREFIX")
                .ok()
                .filter(|p| !p.is_empty())
                .unwrap_or(defaults.cache_key_prefix),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EntityStoreConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.batch_limit, 200);
        assert_eq!(config.delete_page_size(), 195);
    }

    #[test]
    fn test_zero_batch_limit_rejected() {
        let err = EntityStoreConfig::default()
            .with_batch_limit(0)
            .validate()
            .unwrap_err();
        match err {
            ConfigError::InvalidValue { field, .. } => assert_eq!(field, "batch_limit"),
        }
    }

    #[test]
    fn test_slack_must_leave_room() {
        let config = EntityStoreConfig::default()
            .with_batch_limit(5)
            .with_delete_matched_slack(5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_namespace_rejected() {
        let config = EntityStoreConfig::default().with_namespace("");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overlong_prefix_rejected() {
        let fits = EntityStoreConfig::default()
            .with_cache_key_prefix("p".repeat(MAX_CACHE_KEY_PREFIX_LEN));
        assert!(fits.validate().is_ok());

        let err = EntityStoreConfig::default()
            .with_cache_key_prefix("p".repeat(MAX_CACHE_KEY_PREFIX_LEN + 1))
            .validate()
            .unwrap_err();
        match err {
            ConfigError::InvalidValue { field, .. } => assert_eq!(field, "cache_key_prefix"),
        }
    }

    #[test]
    fn test_builders_chain() {
        let config = EntityStoreConfig::default()
            .with_namespace("tenant")
            .with_cache_ttl(Duration::from_secs(30))
            .without_cache()
            .with_defaults_for_absent();
        assert_eq!(config.namespace.as_deref(), Some("tenant"));
        assert_eq!(config.cache_ttl, Duration::from_secs(30));
        assert!(config.no_cache);
        assert!(config.use_default_if_absent);
        assert!(!config.no_timestamp_update);
    }
}
