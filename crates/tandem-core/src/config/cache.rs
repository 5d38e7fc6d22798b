use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the entity cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether caching is enabled (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum number of cached entities (default: 10,000)
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Time-to-live for cached entities in milliseconds (default: 5 minutes)
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_max_entries() -> usize {
    10_000
}

fn default_ttl_ms() -> u64 {
    5 * 60 * 1000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: default_max_entries(),
            ttl_ms: default_ttl_ms(),
        }
    }
}

impl CacheConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = max;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_ms = ttl.as_millis() as u64;
        self
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}
