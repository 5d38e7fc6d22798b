use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the replay engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// Resource name of the replay lock
    /// Default: "ReplayCommitLogsToSecondary"
    #[serde(default = "default_lock_resource")]
    pub lock_resource: String,

    /// Lock scope; independent scopes replay concurrently
    /// Default: "" (global)
    #[serde(default)]
    pub lock_scope: String,

    /// Lease length of the replay lock in milliseconds
    /// Default: 6 minutes
    #[serde(default = "default_lease_length_ms")]
    pub lease_length_ms: u64,

    /// Stop starting new files once this much time has passed (milliseconds).
    /// Must be shorter than the lease so a run never outlives its lock.
    /// Default: 3 minutes
    #[serde(default = "default_replay_timeout_ms")]
    pub replay_timeout_ms: u64,

    /// Maximum concurrent blob metadata reads while listing diff files
    /// Default: 8
    #[serde(default = "default_list_concurrency")]
    pub list_concurrency: usize,

    /// Maximum number of file names printed by a dry run
    /// Default: 10
    #[serde(default = "default_dry_run_preview_limit")]
    pub dry_run_preview_limit: usize,
}

fn default_lock_resource() -> String {
    "ReplayCommitLogsToSecondary".to_string()
}

fn default_lease_length_ms() -> u64 {
    6 * 60 * 1000
}

fn default_replay_timeout_ms() -> u64 {
    3 * 60 * 1000
}

fn default_list_concurrency() -> usize {
    8
}

fn default_dry_run_preview_limit() -> usize {
    10
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            lock_resource: default_lock_resource(),
            lock_scope: String::new(),
            lease_length_ms: default_lease_length_ms(),
            replay_timeout_ms: default_replay_timeout_ms(),
            list_concurrency: default_list_concurrency(),
            dry_run_preview_limit: default_dry_run_preview_limit(),
        }
    }
}

impl ReplayConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lock_scope(mut self, scope: impl Into<String>) -> Self {
        self.lock_scope = scope.into();
        self
    }

    pub fn with_lease_length(mut self, lease: Duration) -> Self {
        self.lease_length_ms = lease.as_millis() as u64;
        self
    }

    pub fn with_replay_timeout(mut self, timeout: Duration) -> Self {
        self.replay_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_list_concurrency(mut self, concurrency: usize) -> Self {
        self.list_concurrency = concurrency;
        self
    }

    pub fn lease_length(&self) -> Duration {
        Duration::from_millis(self.lease_length_ms)
    }

    pub fn replay_timeout(&self) -> Duration {
        Duration::from_millis(self.replay_timeout_ms)
    }

    /// Reject settings that would break single-writer semantics.
    pub fn validate(&self) -> crate::Result<()> {
        if self.lock_resource.is_empty() {
            return Err(crate::TandemError::Config(
                "lock_resource cannot be empty".to_string(),
            ));
        }
        if self.replay_timeout_ms >= self.lease_length_ms {
            return Err(crate::TandemError::Config(format!(
                "replay_timeout_ms ({}) must be shorter than lease_length_ms ({})",
                self.replay_timeout_ms, self.lease_length_ms
            )));
        }
        if self.list_concurrency == 0 {
            return Err(crate::TandemError::Config(
                "list_concurrency must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
