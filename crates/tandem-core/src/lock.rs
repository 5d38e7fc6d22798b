//! Lease-based distributed lock on a (resource, scope) key.
//!
//! A lock row names its holder and an expiration time. A new caller may
//! take over the row when it is absent, when the lease has expired, or when
//! the injected [`LivenessChecker`] reports the recorded holder dead. Every
//! takeover is a compare-and-set against the row that was read, so two
//! concurrent callers can never both win.

use crate::clock::Clock;
use crate::error::{Result, TandemError};
use crate::observe;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRow {
    pub resource_name: String,
    pub scope: String,
    pub holder_id: String,
    pub acquired_time: DateTime<Utc>,
    pub expiration_time: DateTime<Utc>,
}

/// Durable storage of lock rows.
///
/// Implementations must make `compare_and_set` and `delete_if_matches`
/// atomic with respect to each other and to concurrent callers.
pub trait LockStore: Send + Sync {
    fn load(&self, resource_name: &str, scope: &str) -> Result<Option<LockRow>>;

    /// Store `new` if the current row for its key equals `expected`
    /// (`None` meaning no row). Returns whether the row was written.
    fn compare_and_set(&self, expected: Option<&LockRow>, new: &LockRow) -> Result<bool>;

    /// Delete the row for `row`'s key if it still equals `row`.
    fn delete_if_matches(&self, row: &LockRow) -> Result<bool>;
}

/// Answers whether the holder of a lock is still running.
pub trait LivenessChecker: Send + Sync {
    /// Holder id recorded for locks taken by the caller.
    fn current_holder_id(&self) -> String;

    fn is_running(&self, holder_id: &str) -> bool;
}

/// State a lock was found in by an acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Free,
    InUse,
    TimedOut,
    OwnerDied,
}

impl LockState {
    pub fn as_str(self) -> &'static str {
        match self {
            LockState::Free => "FREE",
            LockState::InUse => "IN_USE",
            LockState::TimedOut => "TIMED_OUT",
            LockState::OwnerDied => "OWNER_DIED",
        }
    }
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sink for lock acquisition and release measurements.
pub trait LockMetrics: Send + Sync {
    fn record_acquire(&self, resource_name: &str, scope: &str, state: LockState);

    fn record_release(&self, resource_name: &str, scope: &str, held: Duration);
}

/// Forwards lock measurements to [`crate::observe`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ObservedLockMetrics;

impl LockMetrics for ObservedLockMetrics {
    fn record_acquire(&self, resource_name: &str, _scope: &str, state: LockState) {
        observe::record_lock_acquire(resource_name, state.as_str());
    }

    fn record_release(&self, resource_name: &str, _scope: &str, held: Duration) {
        observe::record_lock_release(resource_name, held);
    }
}

#[derive(Clone)]
pub struct LockService {
    store: Arc<dyn LockStore>,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn LockMetrics>,
}

impl LockService {
    pub fn new(store: Arc<dyn LockStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            metrics: Arc::new(ObservedLockMetrics),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn LockMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Try once to take the lock. Returns `None` when someone else holds it;
    /// that is an expected outcome, not an error.
    pub fn acquire(
        &self,
        resource_name: &str,
        scope: &str,
        lease_length: Duration,
        liveness: &dyn LivenessChecker,
    ) -> Result<Option<Lock>> {
        if resource_name.is_empty() {
            return Err(TandemError::InvalidArgument(
                "lock resource name cannot be empty".to_string(),
            ));
        }
        let lease = chrono::Duration::from_std(lease_length)
            .map_err(|e| TandemError::InvalidArgument(format!("lease length: {e}")))?;

        let now = self.clock.now();
        let existing = self.store.load(resource_name, scope)?;
        let state = match &existing {
            None => LockState::Free,
            Some(row) if row.expiration_time <= now => LockState::TimedOut,
            Some(row) if !liveness.is_running(&row.holder_id) => LockState::OwnerDied,
            Some(_) => LockState::InUse,
        };
        self.metrics.record_acquire(resource_name, scope, state);

        if state == LockState::InUse {
            debug!(resource_name, scope, "Lock is in use");
            return Ok(None);
        }

        let row = LockRow {
            resource_name: resource_name.to_string(),
            scope: scope.to_string(),
            holder_id: liveness.current_holder_id(),
            acquired_time: now,
            expiration_time: now + lease,
        };
        if !self.store.compare_and_set(existing.as_ref(), &row)? {
            debug!(resource_name, scope, "Lost race for lock");
            return Ok(None);
        }

        match (&existing, state) {
            (Some(previous), LockState::TimedOut | LockState::OwnerDied) => info!(
                resource_name,
                scope,
                %state,
                previous_holder = %previous.holder_id,
                "Took over lock"
            ),
            _ => debug!(resource_name, scope, "Acquired lock"),
        }

        Ok(Some(Lock {
            row,
            state,
            store: self.store.clone(),
            clock: self.clock.clone(),
            metrics: self.metrics.clone(),
            released: AtomicBool::new(false),
        }))
    }
}

/// A held lock. Release it explicitly; dropping it leaves the row to expire.
pub struct Lock {
    row: LockRow,
    state: LockState,
    store: Arc<dyn LockStore>,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn LockMetrics>,
    released: AtomicBool,
}

impl Lock {
    pub fn row(&self) -> &LockRow {
        &self.row
    }

    /// State the lock was in before this holder took it.
    pub fn acquired_from(&self) -> LockState {
        self.state
    }

    pub fn expiration_time(&self) -> DateTime<Utc> {
        self.row.expiration_time
    }

    /// Delete the row if it is still ours. Calling this again is a no-op.
    pub fn release(&self) -> Result<()> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let held = (self.clock.now() - self.row.acquired_time)
            .to_std()
            .unwrap_or_default();
        self.metrics
            .record_release(&self.row.resource_name, &self.row.scope, held);

        if self.store.delete_if_matches(&self.row)? {
            debug!(
                resource_name = %self.row.resource_name,
                scope = %self.row.scope,
                held_ms = held.as_millis() as u64,
                "Released lock"
            );
        } else {
            warn!(
                resource_name = %self.row.resource_name,
                scope = %self.row.scope,
                "Lock was taken over before release"
            );
        }
        Ok(())
    }
}

impl fmt::Debug for Lock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lock")
            .field("row", &self.row)
            .field("state", &self.state)
            .finish()
    }
}

/// Process-local lock store.
#[derive(Debug, Default)]
pub struct InMemoryLockStore {
    rows: Mutex<HashMap<(String, String), LockRow>>,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LockStore for InMemoryLockStore {
    fn load(&self, resource_name: &str, scope: &str) -> Result<Option<LockRow>> {
        Ok(self
            .rows
            .lock()
            .get(&(resource_name.to_string(), scope.to_string()))
            .cloned())
    }

    fn compare_and_set(&self, expected: Option<&LockRow>, new: &LockRow) -> Result<bool> {
        let mut rows = self.rows.lock();
        let key = (new.resource_name.clone(), new.scope.clone());
        if rows.get(&key) != expected {
            return Ok(false);
        }
        rows.insert(key, new.clone());
        Ok(true)
    }

    fn delete_if_matches(&self, row: &LockRow) -> Result<bool> {
        let mut rows = self.rows.lock();
        let key = (row.resource_name.clone(), row.scope.clone());
        if rows.get(&key) != Some(row) {
            return Ok(false);
        }
        rows.remove(&key);
        Ok(true)
    }
}
