//! Address book configuration types
//!
//! Base trait and common configuration structures.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ConnectorError, ConnectorResult};

/// Trait for backend-specific configuration.
pub trait ConnectorConfig: Serialize + DeserializeOwned + Clone + Send + Sync {
    /// Validate the configuration.
    ///
    /// Returns an error if the configuration is invalid.
    fn validate(&self) -> ConnectorResult<()>;

    /// Get credentials held by this configuration.
    ///
    /// Returns a list of (field_name, value) pairs for sensitive data.
    fn get_credentials(&self) -> Vec<(&'static str, String)>;

    /// Create a redacted version of this config (for logging/display).
    fn redacted(&self) -> Self;
}

/// Timing settings shared by backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// Connection timeout in seconds.
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,

    /// Server-side time limit for searches, in seconds.
    #[serde(default = "default_search_timeout")]
    pub search_timeout_secs: u64,

    /// Interval between poll ticks while requests are in flight.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How long one poll tick waits for a completion.
    #[serde(default = "default_poll_receive_timeout_ms")]
    pub poll_receive_timeout_ms: u64,

    /// Minimum age of the offline cache before an automatic full refresh.
    #[serde(default = "default_cache_refresh_interval")]
    pub cache_refresh_interval_secs: u64,
}

// Longer intervals are clamped to a century.
const MAX_REFRESH_INTERVAL_SECS: u64 = 100 * 365 * 24 * 60 * 60;

fn default_connection_timeout() -> u64 {
    30
}

fn default_search_timeout() -> u64 {
    60
}

fn default_poll_interval_ms() -> u64 {
    10
}

fn default_poll_receive_timeout_ms() -> u64 {
    10
}

fn default_cache_refresh_interval() -> u64 {
    7 * 24 * 60 * 60
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connection_timeout_secs: default_connection_timeout(),
            search_timeout_secs: default_search_timeout(),
            poll_interval_ms: default_poll_interval_ms(),
            poll_receive_timeout_ms: default_poll_receive_timeout_ms(),
            cache_refresh_interval_secs: default_cache_refresh_interval(),
        }
    }
}

impl ConnectionSettings {
    /// Create new connection settings with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection timeout.
    #[must_use]
    pub fn with_connection_timeout(mut self, secs: u64) -> Self {
        self.connection_timeout_secs = secs;
        self
    }

    /// Set the search time limit.
    #[must_use]
    pub fn with_search_timeout(mut self, secs: u64) -> Self {
        self.search_timeout_secs = secs;
        self
    }

    /// Set the poll tick interval.
    #[must_use]
    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Set the cache refresh interval.
    #[must_use]
    pub fn with_cache_refresh_interval(mut self, secs: u64) -> Self {
        self.cache_refresh_interval_secs = secs;
        self
    }

    /// Get connection timeout as Duration.
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    /// Get the poll interval as Duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Get the poll receive timeout as Duration.
    pub fn poll_receive_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_receive_timeout_ms)
    }

    /// Get the cache refresh interval as a chrono duration.
    pub fn cache_refresh_interval(&self) -> chrono::Duration {
        let secs = self.cache_refresh_interval_secs.min(MAX_REFRESH_INTERVAL_SECS);
        chrono::Duration::seconds(i64::try_from(secs).unwrap_or(0))
    }

    /// Check the settings for values that would stall the poll loop.
    pub fn validate(&self) -> ConnectorResult<()> {
        if self.poll_interval_ms == 0 {
            return Err(ConnectorError::invalid_config(
                "poll_interval_ms must be greater than zero",
            ));
        }
        if self.connection_timeout_secs == 0 {
            return Err(ConnectorError::invalid_config(
                "connection_timeout_secs must be greater than zero",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_json() {
        let settings: ConnectionSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, ConnectionSettings::default());
        assert_eq!(settings.search_timeout_secs, 60);
        assert_eq!(settings.cache_refresh_interval(), chrono::Duration::days(7));
    }

    #[test]
    fn test_builders() {
        let settings = ConnectionSettings::new()
            .with_connection_timeout(5)
            .with_poll_interval(25);
        assert_eq!(settings.connection_timeout(), Duration::from_secs(5));
        assert_eq!(settings.poll_interval(), Duration::from_millis(25));
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let settings = ConnectionSettings::new().with_poll_interval(0);
        assert_eq!(
            settings.validate().unwrap_err().error_code(),
            "INVALID_CONFIG"
        );
    }

    #[test]
    fn test_huge_refresh_interval_saturates() {
        let settings = ConnectionSettings::new().with_cache_refresh_interval(u64::MAX);
        assert!(settings.cache_refresh_interval() > chrono::Duration::days(365));
    }
}
