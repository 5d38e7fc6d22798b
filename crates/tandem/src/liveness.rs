//! Liveness checkers for lock holders.

use dashmap::DashSet;
use std::sync::Arc;
use tandem_core::lock::LivenessChecker;
use uuid::Uuid;

/// Registry of requests running in this process.
///
/// Each request registers a fresh id for its lifetime; a lock holder whose
/// id is no longer registered is dead.
#[derive(Clone, Default)]
pub struct RequestRegistry {
    running: Arc<DashSet<String>>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new request; it stays running until the guard is dropped.
    pub fn begin(&self) -> RequestGuard {
        let id = Uuid::new_v4().to_string();
        self.running.insert(id.clone());
        RequestGuard {
            id,
            running: self.running.clone(),
        }
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.running.contains(id)
    }
}

/// A running request. Implements [`LivenessChecker`] with its own id as the
/// holder id.
pub struct RequestGuard {
    id: String,
    running: Arc<DashSet<String>>,
}

impl RequestGuard {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl LivenessChecker for RequestGuard {
    fn current_holder_id(&self) -> String {
        self.id.clone()
    }

    fn is_running(&self, holder_id: &str) -> bool {
        self.running.contains(holder_id)
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.running.remove(&self.id);
    }
}

/// Holder ids of the form `<pid>@<host>`.
///
/// A holder on this host is dead when its process is gone. Holders on other
/// hosts cannot be checked and are assumed alive until their lease expires.
#[derive(Debug, Clone)]
pub struct ProcessLivenessChecker {
    host: String,
}

impl ProcessLivenessChecker {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }

    /// Uses `$HOSTNAME`, falling back to `localhost`.
    pub fn from_env() -> Self {
        Self::new(std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string()))
    }

    fn process_exists(pid: u32) -> bool {
        if cfg!(target_os = "linux") {
            std::path::Path::new(&format!("/proc/{pid}")).exists()
        } else {
            // No cheap portable check; rely on lease expiry.
            true
        }
    }
}

impl LivenessChecker for ProcessLivenessChecker {
    fn current_holder_id(&self) -> String {
        format!("{}@{}", std::process::id(), self.host)
    }

    fn is_running(&self, holder_id: &str) -> bool {
        let Some((pid, host)) = holder_id.split_once('@') else {
            return true;
        };
        if host != self.host {
            return true;
        }
        match pid.parse::<u32>() {
            Ok(pid) => Self::process_exists(pid),
            Err(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finished_requests_are_dead() {
        let registry = RequestRegistry::new();
        let first = registry.begin();
        let second = registry.begin();
        let first_id = first.current_holder_id();
        assert!(second.is_running(&first_id));

        drop(first);
        assert!(!second.is_running(&first_id));
        assert!(!registry.is_registered(&first_id));
        assert!(second.is_running(second.id()));
    }

    #[test]
    fn process_checker_trusts_other_hosts() {
        let checker = ProcessLivenessChecker::new("here");
        assert!(checker.is_running("1@elsewhere"));
        assert!(checker.is_running("garbage"));
        let me = checker.current_holder_id();
        assert!(me.ends_with("@here"));
        assert!(checker.is_running(&me));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn process_checker_detects_missing_pid() {
        let checker = ProcessLivenessChecker::new("here");
        assert!(!checker.is_running(&format!("{}@here", u32::MAX)));
    }
}
