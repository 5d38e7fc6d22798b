//! Optional metrics instrumentation for replication.
//!
//! When the `observe` feature is enabled, key operations emit counters,
//! histograms, and gauges via the [`metrics`] crate. A downstream
//! application must install a metrics recorder to collect the data.
//!
//! Without the feature every function here is a no-op.

use std::time::Duration;

/// Record a lock acquisition attempt and the state the lock was found in.
///
/// - `tandem.lock.acquire_attempts_total` – counter with `resource` and `state` labels
#[inline]
pub fn record_lock_acquire(resource: &str, state: &'static str) {
    #[cfg(feature = "observe")]
    {
        metrics::counter!(
            "tandem.lock.acquire_attempts_total",
            "resource" => resource.to_string(),
            "state" => state
        )
        .increment(1);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (resource, state);
    }
}

/// Record a lock release and how long it was held.
///
/// - `tandem.lock.held_duration_seconds` – histogram with `resource` label
#[inline]
pub fn record_lock_release(resource: &str, held: Duration) {
    #[cfg(feature = "observe")]
    {
        metrics::histogram!(
            "tandem.lock.held_duration_seconds",
            "resource" => resource.to_string()
        )
        .record(held.as_secs_f64());
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (resource, held);
    }
}

/// Record a replay run.
///
/// - `tandem.replay.runs_total` – counter with `outcome` label
/// - `tandem.replay.run_duration_seconds` – histogram
/// - `tandem.replay.files_applied_total` / `transactions_applied_total` – counters
#[inline]
pub fn record_replay_run(duration: Duration, outcome: &'static str, files: u64, transactions: u64) {
    #[cfg(feature = "observe")]
    {
        metrics::counter!("tandem.replay.runs_total", "outcome" => outcome).increment(1);
        metrics::histogram!("tandem.replay.run_duration_seconds").record(duration.as_secs_f64());
        metrics::counter!("tandem.replay.files_applied_total").increment(files);
        metrics::counter!("tandem.replay.transactions_applied_total").increment(transactions);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (duration, outcome, files, transactions);
    }
}

/// Record a diff export.
///
/// - `tandem.export.total` – counter with `outcome` label (`written` / `exists`)
/// - `tandem.export.duration_seconds` – histogram
#[inline]
pub fn record_export(duration: Duration, transactions: usize, written: bool) {
    #[cfg(feature = "observe")]
    {
        let outcome = if written { "written" } else { "exists" };
        metrics::counter!("tandem.export.total", "outcome" => outcome).increment(1);
        metrics::histogram!("tandem.export.duration_seconds").record(duration.as_secs_f64());
        metrics::histogram!("tandem.export.transactions").record(transactions as f64);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (duration, transactions, written);
    }
}

/// Record a checkpoint computation.
///
/// - `tandem.checkpoint.total` – counter with `outcome` label (`saved` / `superseded`)
#[inline]
pub fn record_checkpoint(saved: bool) {
    #[cfg(feature = "observe")]
    {
        let outcome = if saved { "saved" } else { "superseded" };
        metrics::counter!("tandem.checkpoint.total", "outcome" => outcome).increment(1);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = saved;
    }
}

/// Record an entity cache hit or miss.
///
/// - `tandem.entity_cache.lookups_total` – counter with `result` label
#[inline]
pub fn record_cache_lookup(hit: bool) {
    #[cfg(feature = "observe")]
    {
        let result = if hit { "hit" } else { "miss" };
        metrics::counter!("tandem.entity_cache.lookups_total", "result" => result).increment(1);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = hit;
    }
}
