use crate::clock::start_of_time;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identifier of one shard of the commit log.
pub type BucketId = u32;

/// A consistent cut of the sharded commit log.
///
/// Every manifest with a commit time at or before `bucket_times[b]` in bucket
/// `b` is final, so everything under the cut can be exported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub checkpoint_time: DateTime<Utc>,
    pub bucket_times: BTreeMap<BucketId, DateTime<Utc>>,
}

impl Checkpoint {
    pub fn new(
        checkpoint_time: DateTime<Utc>,
        bucket_times: BTreeMap<BucketId, DateTime<Utc>>,
    ) -> Self {
        Self {
            checkpoint_time,
            bucket_times,
        }
    }

    /// The checkpoint that precedes every commit: all buckets at the start of time.
    pub fn start_of_time(buckets: impl IntoIterator<Item = BucketId>) -> Self {
        let epoch = start_of_time();
        Self {
            checkpoint_time: epoch,
            bucket_times: buckets.into_iter().map(|b| (b, epoch)).collect(),
        }
    }

    /// Cut time of a bucket; buckets unknown to this checkpoint are at the start of time.
    pub fn bucket_time(&self, bucket: BucketId) -> DateTime<Utc> {
        self.bucket_times
            .get(&bucket)
            .copied()
            .unwrap_or_else(start_of_time)
    }
}

/// Result of a compare-then-set checkpoint save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointSave {
    /// Stored as the new root; `previous` is the root it replaced.
    Saved { previous: DateTime<Utc> },
    /// Discarded because a checkpoint at or after it was already stored.
    Superseded { last_written: DateTime<Utc> },
}

/// Request to export every commit between two saved checkpoints.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExportJob {
    pub lower: DateTime<Utc>,
    pub upper: DateTime<Utc>,
}
