//! Checkpoint computation and the periodic checkpoint trigger.
//!
//! A checkpoint is a per-bucket cut of the commit log below which no new
//! manifest can appear. Bucket times are read once, then every bucket is
//! checked for commits that landed after that read; the earliest such
//! commit bounds every bucket from above, so a commit racing the read can
//! never end up below the cut in one bucket and above it in another.

use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tandem_core::{
    clock::{start_of_time, Clock},
    error::Result,
    observe,
    traits::{CheckpointStore, CommitLogSource, ExportQueue},
    types::{BucketId, Checkpoint, CheckpointSave, ExportJob},
};
use tracing::{debug, info};

pub struct CheckpointStrategy {
    source: Arc<dyn CommitLogSource>,
    store: Arc<dyn CheckpointStore>,
    clock: Arc<dyn Clock>,
}

impl CheckpointStrategy {
    pub fn new(
        source: Arc<dyn CommitLogSource>,
        store: Arc<dyn CheckpointStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            source,
            store,
            clock,
        }
    }

    pub fn compute_checkpoint(&self) -> Result<Checkpoint> {
        let checkpoint_time = self.clock.now();
        let buckets = self.source.bucket_ids();

        let mut first_pass = BTreeMap::new();
        for bucket in &buckets {
            let time = self
                .source
                .bucket_last_written(*bucket)?
                .unwrap_or_else(start_of_time);
            first_pass.insert(*bucket, time);
        }

        let threshold = self.find_threshold(&first_pass)?;
        let previous = self.last_saved()?;

        let bucket_times: BTreeMap<BucketId, DateTime<Utc>> = first_pass
            .into_iter()
            .map(|(bucket, mut time)| {
                if let Some(threshold) = threshold {
                    time = time.min(threshold - Duration::milliseconds(1));
                }
                if let Some(previous) = &previous {
                    time = time.max(previous.bucket_time(bucket));
                }
                (bucket, time)
            })
            .collect();

        debug!(%checkpoint_time, ?threshold, buckets = bucket_times.len(), "Computed checkpoint");
        Ok(Checkpoint::new(checkpoint_time, bucket_times))
    }

    /// Earliest commit written to any bucket after that bucket's first-pass time.
    fn find_threshold(
        &self,
        first_pass: &BTreeMap<BucketId, DateTime<Utc>>,
    ) -> Result<Option<DateTime<Utc>>> {
        let mut threshold: Option<DateTime<Utc>> = None;
        for (bucket, time) in first_pass {
            if let Some(next) = self.source.earliest_commit_after(*bucket, *time)? {
                threshold = Some(threshold.map_or(next, |t| t.min(next)));
            }
        }
        Ok(threshold)
    }

    fn last_saved(&self) -> Result<Option<Checkpoint>> {
        let last = self.store.last_written_time()?;
        if last == start_of_time() {
            return Ok(None);
        }
        self.store.load(last)
    }
}

/// Computes a checkpoint, saves it if it is newer than the stored root and
/// enqueues the export of the interval it closes, all in one atomic unit.
pub struct CheckpointTrigger {
    strategy: CheckpointStrategy,
    store: Arc<dyn CheckpointStore>,
    queue: Arc<dyn ExportQueue>,
}

impl CheckpointTrigger {
    pub fn new(
        source: Arc<dyn CommitLogSource>,
        store: Arc<dyn CheckpointStore>,
        queue: Arc<dyn ExportQueue>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            strategy: CheckpointStrategy::new(source, store.clone(), clock),
            store,
            queue,
        }
    }

    pub fn strategy(&self) -> &CheckpointStrategy {
        &self.strategy
    }

    pub fn run(&self) -> Result<CheckpointSave> {
        let checkpoint = self.strategy.compute_checkpoint()?;
        let upper = checkpoint.checkpoint_time;
        let queue = &self.queue;
        let result = self.store.save_if_newer(&checkpoint, &mut |previous| {
            queue.enqueue(ExportJob {
                lower: previous,
                upper,
            })
        })?;

        match &result {
            CheckpointSave::Saved { previous } => {
                observe::record_checkpoint(true);
                info!(
                    checkpoint = %upper,
                    previous = %previous,
                    "Saved checkpoint and enqueued export"
                );
            }
            CheckpointSave::Superseded { last_written } => {
                observe::record_checkpoint(false);
                info!(
                    checkpoint = %upper,
                    last_written = %last_written,
                    "Discarded checkpoint older than the stored one"
                );
            }
        }
        Ok(result)
    }
}
