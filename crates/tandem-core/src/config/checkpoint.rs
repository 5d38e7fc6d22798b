use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for checkpoint computation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// How often the periodic trigger computes a checkpoint (milliseconds)
    /// Default: 1 minute
    #[serde(default = "default_checkpoint_interval_ms")]
    pub interval_ms: u64,
}

fn default_checkpoint_interval_ms() -> u64 {
    60 * 1000
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_checkpoint_interval_ms(),
        }
    }
}

impl CheckpointConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Configuration for diff export and its monitoring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Age after which an export job with no diff file is declared abandoned
    /// (milliseconds). Operational constant, so always configurable.
    /// Default: 20 hours
    #[serde(default = "default_export_staleness_threshold_ms")]
    pub export_staleness_threshold_ms: u64,
}

fn default_export_staleness_threshold_ms() -> u64 {
    20 * 60 * 60 * 1000
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            export_staleness_threshold_ms: default_export_staleness_threshold_ms(),
        }
    }
}

impl ExportConfig {
    pub fn with_staleness_threshold(mut self, threshold: Duration) -> Self {
        self.export_staleness_threshold_ms = threshold.as_millis() as u64;
        self
    }

    pub fn staleness_threshold(&self) -> Duration {
        Duration::from_millis(self.export_staleness_threshold_ms)
    }
}
