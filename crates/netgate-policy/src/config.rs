//! Engine configuration
//!
//! Reading and parsing a configuration file is the caller's job; this is the
//! typed result, with defaults for every field.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Verdict cache entries; 0 disables the cache
    pub cache_capacity: u64,
    /// Verdict cache entry lifetime (seconds)
    pub cache_ttl_secs: u64,
    /// Capacity of the audit channel built by `Engine::with_audit_channel`
    pub audit_channel_capacity: usize,
    /// How often a queued batch re-checks its cancel token (milliseconds)
    pub cancel_poll_ms: u64,
}

impl EngineConfig {
    /// Parse from JSON text
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Verdict cache entry lifetime
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Audit channel capacity; a zero-capacity channel would drop every event
    pub fn audit_capacity(&self) -> usize {
        self.audit_channel_capacity.max(1)
    }

    /// Cancel poll interval
    pub fn cancel_poll(&self) -> Duration {
        Duration::from_millis(self.cancel_poll_ms.max(1))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 0,
            cache_ttl_secs: 60,
            audit_channel_capacity: 65536,
            cancel_poll_ms: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = EngineConfig::from_json(r#"{"cache_capacity": 4096}"#).unwrap();
        assert_eq!(config.cache_capacity, 4096);
        assert_eq!(config.cache_ttl(), Duration::from_secs(60));
        assert_eq!(config.audit_channel_capacity, 65536);
    }

    #[test]
    fn test_zero_poll_is_clamped() {
        let config = EngineConfig {
            cancel_poll_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.cancel_poll(), Duration::from_millis(1));
    }

    #[test]
    fn test_zero_audit_capacity_is_clamped() {
        let config = EngineConfig::from_json(r#"{"audit_channel_capacity": 0}"#).unwrap();
        assert_eq!(config.audit_capacity(), 1);
    }

    #[test]
    fn test_bad_json() {
        assert!(EngineConfig::from_json(r#"{"cache_capacity": "lots"}"#).is_err());
    }
}
