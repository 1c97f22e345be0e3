//! Engine tunables

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the sync engine
///
/// All fields have defaults suitable for a mobile client on a flaky
/// connection; tests override individual fields directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Default TTL applied when `cache_data` is called without one
    #[serde(default = "default_cache_ttl")]
    pub default_cache_ttl: Duration,
    /// Maximum actions popped per drain call
    #[serde(default = "default_batch_size")]
    pub drain_batch_size: usize,
    /// Bound on a single delivery attempt; a timeout counts as a failure
    #[serde(default = "default_delivery_timeout")]
    pub delivery_timeout: Duration,
    /// Window a raw connectivity state must hold before a transition fires
    #[serde(default = "default_debounce")]
    pub reachability_debounce: Duration,
    /// Interval of the coordinator's housekeeping tick (expiry sweep,
    /// debounce flush)
    #[serde(default = "default_tick")]
    pub tick_interval: Duration,
}

fn default_cache_ttl() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_batch_size() -> usize {
    20
}

fn default_delivery_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_debounce() -> Duration {
    Duration::from_secs(1)
}

fn default_tick() -> Duration {
    Duration::from_secs(1)
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            default_cache_ttl: default_cache_ttl(),
            drain_batch_size: default_batch_size(),
            delivery_timeout: default_delivery_timeout(),
            reachability_debounce: default_debounce(),
            tick_interval: default_tick(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.drain_batch_size, 20);
        assert_eq!(config.reachability_debounce, Duration::from_secs(1));
    }

    #[test]
    fn test_deserialize_partial() {
        let config: SyncConfig =
            serde_json::from_str(r#"{"drain_batch_size": 5}"#).unwrap();
        assert_eq!(config.drain_batch_size, 5);
        assert_eq!(config.delivery_timeout, Duration::from_secs(10));
    }
}
