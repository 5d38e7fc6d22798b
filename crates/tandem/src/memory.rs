//! In-process implementations of the replication collaborators.
//!
//! Useful for tests, simulations and single-process deployments. Each one
//! keeps its state behind a mutex so the atomicity each trait promises holds
//! across threads.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use tandem_core::{
    clock::start_of_time,
    error::{Result, TandemError},
    traits::{
        CheckpointStore, CommitLogSource, CommitManifest, CommitMutation, ExportQueue,
        SecondaryStore, SecondaryTxn,
    },
    types::{
        BucketId, Checkpoint, CheckpointSave, EntityKey, EntityKind, EntityPayload, ExportJob,
        Mutation, Operation, Transaction,
    },
};

type BucketLog = BTreeMap<DateTime<Utc>, (CommitManifest, Vec<CommitMutation>)>;

/// Sharded commit log kept in memory.
pub struct MemoryCommitLog {
    buckets: Vec<BucketId>,
    manifests: Mutex<BTreeMap<BucketId, BucketLog>>,
}

impl MemoryCommitLog {
    /// A log with buckets `1..=num_buckets`.
    pub fn new(num_buckets: u32) -> Self {
        let buckets: Vec<BucketId> = (1..=num_buckets).collect();
        Self {
            manifests: Mutex::new(buckets.iter().map(|b| (*b, BTreeMap::new())).collect()),
            buckets,
        }
    }

    /// Record `tx` as one commit: its mutations in order, its deletions on
    /// the manifest.
    pub fn commit(&self, tx: &Transaction) -> Result<()> {
        let mut manifests = self.manifests.lock();
        let bucket = manifests.get_mut(&tx.bucket).ok_or_else(|| {
            TandemError::InvalidArgument(format!("unknown bucket {}", tx.bucket))
        })?;
        if bucket.contains_key(&tx.commit_time) {
            return Err(TandemError::InvalidState(format!(
                "bucket {} already has a commit at {}",
                tx.bucket, tx.commit_time
            )));
        }

        let manifest = CommitManifest {
            bucket: tx.bucket,
            commit_time: tx.commit_time,
            deletions: tx.deletions().cloned().collect(),
        };
        let mutations = tx
            .mutations()
            .map(|m| CommitMutation {
                key: m.key.clone(),
                payload: m.payload.clone(),
            })
            .collect();
        bucket.insert(tx.commit_time, (manifest, mutations));
        Ok(())
    }
}

impl CommitLogSource for MemoryCommitLog {
    fn bucket_ids(&self) -> Vec<BucketId> {
        self.buckets.clone()
    }

    fn bucket_last_written(&self, bucket: BucketId) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .manifests
            .lock()
            .get(&bucket)
            .and_then(|m| m.keys().next_back().copied()))
    }

    fn earliest_commit_after(
        &self,
        bucket: BucketId,
        after: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        use std::ops::Bound::{Excluded, Unbounded};
        Ok(self.manifests.lock().get(&bucket).and_then(|m| {
            m.range((Excluded(after), Unbounded))
                .next()
                .map(|(time, _)| *time)
        }))
    }

    fn manifests_between(
        &self,
        bucket: BucketId,
        lower: DateTime<Utc>,
        upper: DateTime<Utc>,
    ) -> Result<Vec<CommitManifest>> {
        use std::ops::Bound::{Excluded, Included};
        if upper <= lower {
            return Ok(Vec::new());
        }
        Ok(self
            .manifests
            .lock()
            .get(&bucket)
            .map(|m| {
                m.range((Excluded(lower), Included(upper)))
                    .map(|(_, (manifest, _))| manifest.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn mutations_of(&self, manifest: &CommitManifest) -> Result<Vec<CommitMutation>> {
        self.manifests
            .lock()
            .get(&manifest.bucket)
            .and_then(|m| m.get(&manifest.commit_time))
            .map(|(_, mutations)| mutations.clone())
            .ok_or_else(|| {
                TandemError::NotFound(format!(
                    "manifest at {} in bucket {}",
                    manifest.commit_time, manifest.bucket
                ))
            })
    }
}

#[derive(Default)]
struct CheckpointState {
    checkpoints: BTreeMap<DateTime<Utc>, Checkpoint>,
    root: Option<DateTime<Utc>>,
}

/// Checkpoints and their root pointer kept in memory.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    state: Mutex<CheckpointState>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn last_written_time(&self) -> Result<DateTime<Utc>> {
        Ok(self.state.lock().root.unwrap_or_else(start_of_time))
    }

    fn load(&self, checkpoint_time: DateTime<Utc>) -> Result<Option<Checkpoint>> {
        Ok(self.state.lock().checkpoints.get(&checkpoint_time).cloned())
    }

    fn save_if_newer(
        &self,
        checkpoint: &Checkpoint,
        on_save: &mut dyn FnMut(DateTime<Utc>) -> Result<()>,
    ) -> Result<CheckpointSave> {
        let mut state = self.state.lock();
        let last_written = state.root.unwrap_or_else(start_of_time);
        if last_written >= checkpoint.checkpoint_time {
            return Ok(CheckpointSave::Superseded { last_written });
        }
        on_save(last_written)?;
        state
            .checkpoints
            .insert(checkpoint.checkpoint_time, checkpoint.clone());
        state.root = Some(checkpoint.checkpoint_time);
        Ok(CheckpointSave::Saved {
            previous: last_written,
        })
    }
}

/// FIFO export job queue kept in memory.
#[derive(Default)]
pub struct MemoryExportQueue {
    jobs: Mutex<VecDeque<ExportJob>>,
    reject_enqueue: Mutex<bool>,
}

impl MemoryExportQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `enqueue` fail until called again with `false`.
    pub fn reject_enqueue(&self, reject: bool) {
        *self.reject_enqueue.lock() = reject;
    }
}

impl ExportQueue for MemoryExportQueue {
    fn enqueue(&self, job: ExportJob) -> Result<()> {
        if *self.reject_enqueue.lock() {
            return Err(TandemError::CheckpointStore(
                "export queue rejected job".to_string(),
            ));
        }
        let mut jobs = self.jobs.lock();
        if !jobs.contains(&job) {
            jobs.push_back(job);
        }
        Ok(())
    }

    fn pending(&self) -> Result<Vec<ExportJob>> {
        Ok(self.jobs.lock().iter().cloned().collect())
    }

    fn complete(&self, job: &ExportJob) -> Result<()> {
        self.jobs.lock().retain(|j| j != job);
        Ok(())
    }
}

/// A write that reached the secondary store, in commit order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    Put(EntityKey),
    Delete(EntityKey),
    Cursor(DateTime<Utc>),
}

struct SecondaryState {
    rows: BTreeMap<EntityKey, EntityPayload>,
    cursor: DateTime<Utc>,
    journal: Vec<JournalEntry>,
    commits: u64,
}

/// Secondary store kept in memory, with a journal of committed writes and
/// injectable write failures.
pub struct MemorySecondaryStore {
    state: Mutex<SecondaryState>,
    fail_writes_to: Mutex<Option<EntityKey>>,
}

impl Default for MemorySecondaryStore {
    fn default() -> Self {
        Self {
            state: Mutex::new(SecondaryState {
                rows: BTreeMap::new(),
                cursor: start_of_time(),
                journal: Vec::new(),
                commits: 0,
            }),
            fail_writes_to: Mutex::new(None),
        }
    }
}

impl MemorySecondaryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed rows outside of replay.
    pub fn seed(&self, key: EntityKey, payload: EntityPayload) {
        self.state.lock().rows.insert(key, payload);
    }

    /// Make any write to `key` fail.
    pub fn fail_writes_to(&self, key: Option<EntityKey>) {
        *self.fail_writes_to.lock() = key;
    }

    pub fn keys(&self) -> Vec<EntityKey> {
        self.state.lock().rows.keys().cloned().collect()
    }

    pub fn journal(&self) -> Vec<JournalEntry> {
        self.state.lock().journal.clone()
    }

    pub fn commit_count(&self) -> u64 {
        self.state.lock().commits
    }

    fn check_write(&self, key: &EntityKey) -> Result<()> {
        if self.fail_writes_to.lock().as_ref() == Some(key) {
            return Err(TandemError::Secondary(format!("write to {key} failed")));
        }
        Ok(())
    }
}

pub struct MemorySecondaryTxn<'a> {
    store: &'a MemorySecondaryStore,
    staged: Vec<Operation>,
}

impl<'a> SecondaryTxn for MemorySecondaryTxn<'a> {
    fn put(&mut self, key: &EntityKey, payload: &EntityPayload) -> Result<()> {
        self.store.check_write(key)?;
        self.staged.push(Operation::Mutation(Mutation {
            key: key.clone(),
            payload: payload.clone(),
        }));
        Ok(())
    }

    fn delete(&mut self, key: &EntityKey) -> Result<()> {
        self.store.check_write(key)?;
        self.staged.push(Operation::Deletion(key.clone()));
        Ok(())
    }

    fn commit(self: Box<Self>, cursor: DateTime<Utc>) -> Result<()> {
        let mut state = self.store.state.lock();
        if cursor < state.cursor {
            return Err(TandemError::InvalidState(format!(
                "replication cursor cannot move back from {} to {cursor}",
                state.cursor
            )));
        }
        for op in self.staged {
            match op {
                Operation::Mutation(m) => {
                    state.journal.push(JournalEntry::Put(m.key.clone()));
                    state.rows.insert(m.key, m.payload);
                }
                Operation::Deletion(key) => {
                    state.rows.remove(&key);
                    state.journal.push(JournalEntry::Delete(key));
                }
            }
        }
        state.cursor = cursor;
        state.journal.push(JournalEntry::Cursor(cursor));
        state.commits += 1;
        Ok(())
    }

    fn rollback(self: Box<Self>) {}
}

impl SecondaryStore for MemorySecondaryStore {
    type Txn<'a> = MemorySecondaryTxn<'a>;

    fn begin_txn(&self) -> Result<Self::Txn<'_>> {
        Ok(MemorySecondaryTxn {
            store: self,
            staged: Vec::new(),
        })
    }

    fn get_cursor(&self) -> Result<DateTime<Utc>> {
        Ok(self.state.lock().cursor)
    }

    fn load(&self, key: &EntityKey) -> Result<Option<EntityPayload>> {
        Ok(self.state.lock().rows.get(key).cloned())
    }

    fn list_ids(&self, kind: EntityKind) -> Result<Vec<String>> {
        Ok(self
            .state
            .lock()
            .rows
            .keys()
            .filter(|k| k.kind == kind)
            .map(|k| k.id.clone())
            .collect())
    }
}
