use crate::error::Result;
use crate::types::{BucketId, EntityKey, EntityPayload};
use chrono::{DateTime, Utc};

/// Record of one atomic commit in one bucket of the primary store's log.
/// Deletions live on the manifest, mutations are stored beside it.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitManifest {
    pub bucket: BucketId,
    pub commit_time: DateTime<Utc>,
    pub deletions: Vec<EntityKey>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommitMutation {
    pub key: EntityKey,
    pub payload: EntityPayload,
}

/// Read access to the primary store's sharded commit log.
pub trait CommitLogSource: Send + Sync {
    fn bucket_ids(&self) -> Vec<BucketId>;

    /// Commit time of the latest manifest in `bucket`, if any.
    fn bucket_last_written(&self, bucket: BucketId) -> Result<Option<DateTime<Utc>>>;

    /// Earliest commit time strictly after `after` in `bucket`.
    fn earliest_commit_after(
        &self,
        bucket: BucketId,
        after: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>>;

    /// Manifests with `lower < commit_time <= upper`, ascending by commit time.
    fn manifests_between(
        &self,
        bucket: BucketId,
        lower: DateTime<Utc>,
        upper: DateTime<Utc>,
    ) -> Result<Vec<CommitManifest>>;

    /// Mutations written by `manifest`'s commit, in source order.
    fn mutations_of(&self, manifest: &CommitManifest) -> Result<Vec<CommitMutation>>;
}
