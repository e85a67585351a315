//! Client configuration loaded from environment variables.
//!
//! All settings have defaults so the engine runs with zero configuration.

use std::path::PathBuf;
use std::time::Duration;

use murmur_shared::types::SortDirection;
use murmur_store::StoreOptions;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// SQLite database file.
    /// Env: `MURMUR_DB_PATH`
    /// Default: none (the platform data directory is used).
    pub database_path: Option<PathBuf>,

    /// Initial message sort direction.
    /// Env: `MURMUR_MESSAGE_SORT` (`asc` / `desc`)
    /// Default: ascending.
    pub default_sort: SortDirection,

    /// Rendered timelines buffered per message feed.
    /// Env: `MURMUR_FEED_CAPACITY`
    /// Default: `32`
    pub feed_capacity: usize,

    /// How often subscriptions re-query the store without a local write.
    /// Env: `MURMUR_POLL_INTERVAL_MS`
    /// Default: `2000`
    pub poll_interval: Duration,

    /// Clock skew tolerated when collapsing an optimistic message into its
    /// persisted copy.
    /// Env: `MURMUR_PENDING_MATCH_SECS`
    /// Default: `300`
    pub pending_match_window: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            default_sort: SortDirection::Ascending,
            feed_capacity: 32,
            poll_interval: Duration::from_millis(2000),
            pending_match_window: Duration::from_secs(300),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(path) = lookup("MURMUR_DB_PATH").filter(|p| !p.trim().is_empty()) {
            config.database_path = Some(PathBuf::from(path));
        }

        if let Some(val) = lookup("MURMUR_MESSAGE_SORT") {
            match val.parse::<SortDirection>() {
                Ok(direction) => config.default_sort = direction,
                Err(e) => tracing::warn!(value = %val, error = %e, "Invalid MURMUR_MESSAGE_SORT, using default"),
            }
        }

        if let Some(val) = lookup("MURMUR_FEED_CAPACITY") {
            match val.trim().parse::<usize>() {
                Ok(n) if n > 0 => config.feed_capacity = n,
                _ => tracing::warn!(value = %val, "Invalid MURMUR_FEED_CAPACITY, using default"),
            }
        }

        if let Some(val) = lookup("MURMUR_POLL_INTERVAL_MS") {
            match val.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => config.poll_interval = Duration::from_millis(ms),
                _ => tracing::warn!(value = %val, "Invalid MURMUR_POLL_INTERVAL_MS, using default"),
            }
        }

        if let Some(val) = lookup("MURMUR_PENDING_MATCH_SECS") {
            match val.trim().parse::<u64>() {
                Ok(secs) => config.pending_match_window = Duration::from_secs(secs),
                Err(_) => tracing::warn!(value = %val, "Invalid MURMUR_PENDING_MATCH_SECS, using default"),
            }
        }

        config
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            poll_interval: self.poll_interval,
            ..StoreOptions::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ClientConfig::from_lookup(|_| None);
        assert!(config.database_path.is_none());
        assert_eq!(config.default_sort, SortDirection::Ascending);
        assert_eq!(config.feed_capacity, 32);
        assert_eq!(config.store_options().poll_interval, Duration::from_millis(2000));
    }

    #[test]
    fn test_values_are_read() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("MURMUR_DB_PATH", "/tmp/murmur.db"),
            ("MURMUR_MESSAGE_SORT", "desc"),
            ("MURMUR_FEED_CAPACITY", "4"),
            ("MURMUR_POLL_INTERVAL_MS", "250"),
            ("MURMUR_PENDING_MATCH_SECS", "10"),
        ]));
        assert_eq!(config.database_path, Some(PathBuf::from("/tmp/murmur.db")));
        assert_eq!(config.default_sort, SortDirection::Descending);
        assert_eq!(config.feed_capacity, 4);
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.pending_match_window, Duration::from_secs(10));
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("MURMUR_MESSAGE_SORT", "sideways"),
            ("MURMUR_FEED_CAPACITY", "0"),
            ("MURMUR_POLL_INTERVAL_MS", "soon"),
        ]));
        let default = ClientConfig::default();
        assert_eq!(config.default_sort, default.default_sort);
        assert_eq!(config.feed_capacity, default.feed_capacity);
        assert_eq!(config.poll_interval, default.poll_interval);
    }
}
