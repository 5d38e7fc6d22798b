//! Integration tests for checkpoint, export and replay over in-memory stores

use chrono::{Duration as ChronoDuration, TimeZone};
use serde_json::json;
use std::time::Duration;
use tandem::prelude::*;
use tandem::{
    start_of_time, CachedEntity, CheckpointSave, DiffFile, DiffFileName, EntityCache,
    InMemoryLockStore, JournalEntry, KindDescriptor, KindRegistry, RequestRegistry,
};

fn at(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).unwrap()
}

fn key(kind: EntityKind, id: &str) -> EntityKey {
    EntityKey::new(kind, id)
}

fn payload(id: &str) -> EntityPayload {
    EntityPayload::v1(json!({ "name": id }))
}

struct Harness {
    log: Arc<MemoryCommitLog>,
    blobs: Arc<MemoryBlobStore>,
    secondary: Arc<MemorySecondaryStore>,
    clock: Arc<FakeClock>,
    locks: Arc<InMemoryLockStore>,
    cache: Arc<EntityCache>,
    replicator: Replicator<MemorySecondaryStore>,
}

impl Harness {
    fn new(phase: MigrationPhase) -> Self {
        Self::build(phase, FakeClock::new(at(10_000)), ReplayConfig::default())
    }

    fn build(phase: MigrationPhase, clock: FakeClock, config: ReplayConfig) -> Self {
        Self::with_secondary(phase, clock, config, Arc::new(MemorySecondaryStore::new()))
    }

    fn with_secondary(
        phase: MigrationPhase,
        clock: FakeClock,
        config: ReplayConfig,
        secondary: Arc<MemorySecondaryStore>,
    ) -> Self {
        Self::assemble(phase, clock, config, secondary, KindRegistry::standard())
    }

    fn with_registry(phase: MigrationPhase, registry: KindRegistry) -> Self {
        Self::assemble(
            phase,
            FakeClock::new(at(10_000)),
            ReplayConfig::default(),
            Arc::new(MemorySecondaryStore::new()),
            registry,
        )
    }

    fn assemble(
        phase: MigrationPhase,
        clock: FakeClock,
        config: ReplayConfig,
        secondary: Arc<MemorySecondaryStore>,
        registry: KindRegistry,
    ) -> Self {
        let log = Arc::new(MemoryCommitLog::new(2));
        let blobs = Arc::new(MemoryBlobStore::new());
        let clock = Arc::new(clock);
        let locks = Arc::new(InMemoryLockStore::new());
        let cache = Arc::new(EntityCache::new(&CacheConfig::default()));
        let replicator = Replicator::builder(secondary.clone())
            .with_source(log.clone())
            .with_checkpoints(Arc::new(MemoryCheckpointStore::new()))
            .with_queue(Arc::new(MemoryExportQueue::new()))
            .with_blobs(blobs.clone())
            .with_phase(Arc::new(FixedPhase(phase)))
            .with_lock_store(locks.clone())
            .with_liveness(Arc::new(ProcessLivenessChecker::new("test-host")))
            .with_clock(clock.clone())
            .with_cache(cache.clone())
            .with_registry(Arc::new(registry))
            .with_replay_config(config)
            .build()
            .unwrap();
        Self {
            log,
            blobs,
            secondary,
            clock,
            locks,
            cache,
            replicator,
        }
    }

    fn commit(&self, tx: Transaction) {
        self.log.commit(&tx).unwrap();
    }

    /// Checkpoint and export everything committed so far; returns the new
    /// diff file's upper bound.
    async fn publish(&self) -> DateTime<Utc> {
        self.replicator.checkpoint().unwrap();
        let reports = self.replicator.export_pending().await.unwrap();
        assert_eq!(reports.len(), 1);
        reports[0].name.upper()
    }

    fn advance(&self, ms: i64) {
        self.clock.advance_by(ChronoDuration::milliseconds(ms));
    }

    /// `{A, B}` in the first file, then `{+D, +E, -B}` in the second.
    async fn two_files(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        self.commit(
            Transaction::new(at(5_000), 1)
                .add_update(EntityKind::Registrar, "A", payload("A"))
                .add_update(EntityKind::Registrar, "B", payload("B")),
        );
        let first = self.publish().await;

        self.advance(10_000);
        self.commit(
            Transaction::new(at(15_000), 2)
                .add_update(EntityKind::Registrar, "D", payload("D"))
                .add_update(EntityKind::Registrar, "E", payload("E"))
                .add_delete(EntityKind::Registrar, "B"),
        );
        let second = self.publish().await;
        (first, second)
    }

    fn registrars(&self) -> Vec<String> {
        self.secondary.list_ids(EntityKind::Registrar).unwrap()
    }

    /// Swap the stored bytes of the diff file ending at `upper`, keeping its
    /// metadata.
    async fn replace_diff(&self, upper: DateTime<Utc>, rewrite: impl FnOnce(Vec<u8>) -> Vec<u8>) {
        let name = DiffFileName::for_checkpoint(upper).to_string();
        let bytes = self.blobs.read(&name).await.unwrap();
        let metadata = self.blobs.metadata(&name).await.unwrap();
        assert!(self.blobs.remove(&name));
        assert!(self.blobs.write(&name, rewrite(bytes), metadata).await.unwrap());
    }

    fn assert_lock_released(&self) {
        assert!(self
            .locks
            .load(&ReplayConfig::default().lock_resource, "")
            .unwrap()
            .is_none());
    }
}

#[tokio::test]
async fn test_end_to_end_two_files() {
    let h = Harness::new(MigrationPhase::DatastorePrimary);
    let (first, second) = h.two_files().await;
    assert!(first < second);
    assert_eq!(h.blobs.names().len(), 2);

    let outcome = h.replicator.replay(false).await.unwrap();
    match &outcome {
        ReplayOutcome::CaughtUp(stats) => {
            assert_eq!(stats.files, 2);
            assert_eq!(stats.transactions, 2);
            assert_eq!(stats.cursor, second);
        }
        other => panic!("unexpected outcome: {other}"),
    }
    assert!(outcome.to_string().starts_with("Caught up after replaying 2 file(s)"));

    assert_eq!(h.registrars(), vec!["A", "D", "E"]);
    assert_eq!(h.secondary.get_cursor().unwrap(), second);
    assert_eq!(h.secondary.commit_count(), 2);

    // Lock was released.
    assert!(h
        .locks
        .load(&ReplayConfig::default().lock_resource, "")
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_end_to_end_from_seeded_store() {
    let seeded = Arc::new(MemorySecondaryStore::new());
    seeded.seed(key(EntityKind::Registrar, "A"), payload("A"));
    seeded.seed(key(EntityKind::Registrar, "B"), payload("B"));
    let h = Harness::with_secondary(
        MigrationPhase::DatastorePrimary,
        FakeClock::new(at(10_000)),
        ReplayConfig::default(),
        seeded,
    );

    h.commit(
        Transaction::new(at(5_000), 1)
            .add_update(EntityKind::Registrar, "C", payload("C"))
            .add_update(EntityKind::Registrar, "D", payload("D")),
    );
    h.commit(Transaction::new(at(6_000), 2).add_delete(EntityKind::Registrar, "B"));
    let first = h.publish().await;

    h.advance(10_000);
    h.commit(
        Transaction::new(at(15_000), 1)
            .add_update(EntityKind::Registrar, "E", payload("E"))
            .add_delete(EntityKind::Registrar, "C"),
    );
    let second = h.publish().await;
    assert!(first < second);

    let stats = h.replicator.replay(false).await.unwrap();
    let stats = stats.stats().cloned().unwrap();
    assert_eq!(stats.files, 2);
    assert_eq!(stats.transactions, 3);
    assert_eq!(stats.cursor, second);

    assert_eq!(h.registrars(), vec!["A", "D", "E"]);
    assert_eq!(
        h.secondary.load(&key(EntityKind::Registrar, "D")).unwrap(),
        Some(payload("D"))
    );
    assert_eq!(h.secondary.get_cursor().unwrap(), second);
    h.assert_lock_released();
}

#[tokio::test]
async fn test_corrupted_diff_file_stops_replay() {
    let h = Harness::new(MigrationPhase::DatastorePrimary);
    let (first, second) = h.two_files().await;
    h.replace_diff(second, |mut bytes| {
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        bytes
    })
    .await;

    let err = h.replicator.replay(false).await.unwrap_err();
    assert!(matches!(err, TandemError::Deserialization(_)), "{err}");

    assert_eq!(h.secondary.get_cursor().unwrap(), first);
    assert_eq!(h.registrars(), vec!["A", "B"]);
    h.assert_lock_released();
}

#[tokio::test]
async fn test_unknown_kind_stops_replay() {
    let mut registry = KindRegistry::empty();
    for kind in EntityKind::ALL {
        if kind != EntityKind::HostResource {
            registry.register(KindDescriptor::new(kind, 1));
        }
    }
    let h = Harness::with_registry(MigrationPhase::DatastorePrimary, registry);

    h.commit(Transaction::new(at(5_000), 1).add_update(EntityKind::Registrar, "A", payload("A")));
    let first = h.publish().await;
    h.advance(10_000);
    h.commit(
        Transaction::new(at(15_000), 1)
            .add_update(EntityKind::Registrar, "B", payload("B"))
            .add_update(EntityKind::HostResource, "h", payload("h")),
    );
    h.publish().await;

    let err = h.replicator.replay(false).await.unwrap_err();
    match &err {
        TandemError::UnknownKind(name) => assert_eq!(name, EntityKind::HostResource.name()),
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(h.secondary.get_cursor().unwrap(), first);
    assert_eq!(h.registrars(), vec!["A"]);
    assert!(h.secondary.list_ids(EntityKind::HostResource).unwrap().is_empty());
    h.assert_lock_released();
}

#[tokio::test]
async fn test_header_disagreeing_with_metadata_stops_replay() {
    let h = Harness::new(MigrationPhase::DatastorePrimary);
    let (first, second) = h.two_files().await;
    h.replace_diff(second, |bytes| {
        let mut diff = DiffFile::decode(&bytes, &KindRegistry::standard()).unwrap();
        diff.header.lower = first - ChronoDuration::milliseconds(1);
        diff.encode().unwrap()
    })
    .await;

    let err = h.replicator.replay(false).await.unwrap_err();
    assert!(matches!(err, TandemError::Deserialization(_)), "{err}");

    assert_eq!(h.secondary.get_cursor().unwrap(), first);
    assert_eq!(h.registrars(), vec!["A", "B"]);
    h.assert_lock_released();
}

#[tokio::test]
async fn test_rerun_after_catch_up_applies_nothing() {
    let h = Harness::new(MigrationPhase::DatastorePrimary);
    h.two_files().await;
    h.replicator.replay(false).await.unwrap();

    let outcome = h.replicator.replay(false).await.unwrap();
    assert_eq!(outcome.stats().map(|s| s.files), Some(0));
    assert_eq!(h.secondary.commit_count(), 2);
}

#[tokio::test]
async fn test_reapplying_files_is_idempotent() {
    let reference = Harness::new(MigrationPhase::DatastorePrimary);
    reference.two_files().await;
    reference.replicator.replay(false).await.unwrap();

    // Writes already landed but the cursor never advanced.
    let crashed = Arc::new(MemorySecondaryStore::new());
    for k in reference.secondary.keys() {
        crashed.seed(k.clone(), reference.secondary.load(&k).unwrap().unwrap());
    }
    let retry = Harness::with_secondary(
        MigrationPhase::DatastorePrimary,
        FakeClock::new(at(10_000)),
        ReplayConfig::default(),
        crashed,
    );
    retry.two_files().await;
    retry.replicator.replay(false).await.unwrap();

    assert_eq!(retry.secondary.keys(), reference.secondary.keys());
    for k in reference.secondary.keys() {
        assert_eq!(
            retry.secondary.load(&k).unwrap(),
            reference.secondary.load(&k).unwrap()
        );
    }
}

#[tokio::test]
async fn test_writes_follow_dependency_order() {
    let h = Harness::new(MigrationPhase::DatastorePrimary);
    h.commit(
        Transaction::new(at(5_000), 1)
            .add_delete(EntityKind::ContactResource, "c")
            .add_update(EntityKind::DomainBase, "d", payload("d"))
            .add_delete(EntityKind::PollMessage, "p")
            .add_update(EntityKind::Registrar, "r", payload("r"))
            .add_update(EntityKind::HostResource, "h", payload("h")),
    );
    let upper = h.publish().await;
    h.replicator.replay(false).await.unwrap();

    assert_eq!(
        h.secondary.journal(),
        vec![
            JournalEntry::Put(key(EntityKind::Registrar, "r")),
            JournalEntry::Put(key(EntityKind::HostResource, "h")),
            JournalEntry::Put(key(EntityKind::DomainBase, "d")),
            JournalEntry::Delete(key(EntityKind::PollMessage, "p")),
            JournalEntry::Delete(key(EntityKind::ContactResource, "c")),
            JournalEntry::Cursor(upper),
        ]
    );
}

#[tokio::test]
async fn test_inserts_precede_deletes() {
    let h = Harness::new(MigrationPhase::DatastorePrimary);
    h.secondary.seed(key(EntityKind::Registrar, "Y"), payload("Y"));
    h.commit(
        Transaction::new(at(5_000), 1)
            .add_delete(EntityKind::Registrar, "Y")
            .add_update(EntityKind::Registrar, "X", payload("X")),
    );
    h.publish().await;
    h.replicator.replay(false).await.unwrap();

    let journal = h.secondary.journal();
    assert_eq!(journal[0], JournalEntry::Put(key(EntityKind::Registrar, "X")));
    assert_eq!(journal[1], JournalEntry::Delete(key(EntityKind::Registrar, "Y")));
    assert_eq!(h.registrars(), vec!["X"]);
}

#[tokio::test]
async fn test_unreplicated_kinds_never_reach_secondary() {
    let h = Harness::new(MigrationPhase::DatastorePrimary);
    h.commit(
        Transaction::new(at(5_000), 1)
            .add_update(EntityKind::Registrar, "r", payload("r"))
            .add_update(EntityKind::Lock, "l", payload("l"))
            .add_update(EntityKind::EppResourceIndex, "i", payload("i"))
            .add_delete(EntityKind::ForeignKeyIndex, "f"),
    );
    h.publish().await;
    h.replicator.replay(false).await.unwrap();

    assert_eq!(h.secondary.keys(), vec![key(EntityKind::Registrar, "r")]);
    assert!(h.secondary.journal().iter().all(|entry| match entry {
        JournalEntry::Put(k) | JournalEntry::Delete(k) => k.kind.is_replicated(),
        JournalEntry::Cursor(_) => true,
    }));
}

#[tokio::test]
async fn test_failed_file_leaves_no_partial_state() {
    let h = Harness::new(MigrationPhase::DatastorePrimary);
    let (first, second) = h.two_files().await;

    h.secondary.fail_writes_to(Some(key(EntityKind::Registrar, "E")));
    let err = h.replicator.replay(false).await.unwrap_err();
    assert!(matches!(err, TandemError::Secondary(_)), "{err}");

    // First file committed; nothing of the second one is visible.
    assert_eq!(h.secondary.get_cursor().unwrap(), first);
    assert_eq!(h.registrars(), vec!["A", "B"]);

    // The lock was released despite the failure.
    assert!(h
        .locks
        .load(&ReplayConfig::default().lock_resource, "")
        .unwrap()
        .is_none());

    h.secondary.fail_writes_to(None);
    let outcome = h.replicator.replay(false).await.unwrap();
    assert_eq!(outcome.stats().map(|s| s.files), Some(1));
    assert_eq!(h.secondary.get_cursor().unwrap(), second);
    assert_eq!(h.registrars(), vec!["A", "D", "E"]);
}

#[tokio::test]
async fn test_missing_diff_file_is_fatal() {
    let h = Harness::new(MigrationPhase::DatastorePrimary);
    h.two_files().await;
    h.advance(10_000);
    h.commit(
        Transaction::new(at(25_000), 1).add_update(EntityKind::Registrar, "F", payload("F")),
    );
    let third = h.publish().await;

    let names = h.blobs.names();
    assert!(h.blobs.remove(&names[1]));

    let err = h.replicator.replay(false).await.unwrap_err();
    match err {
        TandemError::MissingDiffFile { file, .. } => {
            assert_eq!(file, DiffFileName::for_checkpoint(third).to_string())
        }
        other => panic!("unexpected error: {other}"),
    }
    // Nothing past the gap was applied.
    assert_eq!(h.secondary.get_cursor().unwrap(), start_of_time());
    assert!(h.secondary.keys().is_empty());
}

#[tokio::test]
async fn test_replay_skipped_outside_replicating_phases() {
    let h = Harness::new(MigrationPhase::DatastoreOnly);
    h.two_files().await;

    let outcome = h.replicator.replay(false).await.unwrap();
    assert_eq!(
        outcome.to_string(),
        "SKIPPED Replay is inactive in migration phase DATASTORE_ONLY"
    );
    assert!(h.secondary.keys().is_empty());
}

#[tokio::test]
async fn test_replay_aborts_when_lock_is_held() {
    let h = Harness::new(MigrationPhase::DatastorePrimary);
    h.two_files().await;

    let registry = RequestRegistry::new();
    let other = registry.begin();
    let service = LockService::new(h.locks.clone(), h.clock.clone());
    let config = ReplayConfig::default();
    let held = service
        .acquire(&config.lock_resource, "", config.lease_length(), &other)
        .unwrap()
        .expect("lock is free");

    // The process checker cannot judge a foreign holder id and treats it as alive.
    let outcome = h.replicator.replay(false).await.unwrap();
    assert_eq!(
        outcome.to_string(),
        format!("ABORTED Can't acquire lock {}", config.lock_resource)
    );
    assert!(h.secondary.keys().is_empty());

    held.release().unwrap();
    let outcome = h.replicator.replay(false).await.unwrap();
    assert_eq!(outcome.stats().map(|s| s.files), Some(2));
}

#[tokio::test]
async fn test_expired_lock_is_taken_over() {
    let h = Harness::new(MigrationPhase::DatastorePrimary);
    h.two_files().await;

    let registry = RequestRegistry::new();
    let other = registry.begin();
    let service = LockService::new(h.locks.clone(), h.clock.clone());
    let config = ReplayConfig::default();
    let _stuck = service
        .acquire(&config.lock_resource, "", config.lease_length(), &other)
        .unwrap()
        .expect("lock is free");

    h.clock
        .advance_by(ChronoDuration::from_std(config.lease_length()).unwrap());
    let outcome = h.replicator.replay(false).await.unwrap();
    assert_eq!(outcome.stats().map(|s| s.files), Some(2));
}

#[tokio::test]
async fn test_dry_run_reports_the_next_window() {
    let h = Harness::new(MigrationPhase::DatastorePrimary);
    let (first, second) = h.two_files().await;

    // Dry runs ignore the lock entirely.
    let registry = RequestRegistry::new();
    let other = registry.begin();
    let service = LockService::new(h.locks.clone(), h.clock.clone());
    let config = ReplayConfig::default();
    let held = service
        .acquire(&config.lock_resource, "", config.lease_length(), &other)
        .unwrap()
        .unwrap();

    let dry = h.replicator.replay(true).await.unwrap();
    let (start, end, files) = match &dry {
        ReplayOutcome::DryRun {
            start, end, files, ..
        } => (*start, *end, files.clone()),
        other => panic!("unexpected outcome: {other}"),
    };
    assert_eq!(start, start_of_time());
    assert_eq!(end, second);
    assert_eq!(
        files,
        vec![
            DiffFileName::for_checkpoint(first),
            DiffFileName::for_checkpoint(second)
        ]
    );
    assert!(dry.to_string().contains("would contain 2 file(s)"));
    assert!(h.secondary.keys().is_empty());
    assert_eq!(h.secondary.commit_count(), 0);

    held.release().unwrap();
    let real = h.replicator.replay(false).await.unwrap();
    let stats = real.stats().unwrap();
    assert_eq!(stats.files as usize, files.len());
    assert_eq!(stats.cursor, end);
}

#[tokio::test]
async fn test_replay_stops_between_files_on_timeout() {
    let config = ReplayConfig::default().with_replay_timeout(Duration::from_millis(1));
    let clock = FakeClock::new(at(10_000)).with_auto_increment(ChronoDuration::milliseconds(1));
    let h = Harness::build(MigrationPhase::DatastorePrimary, clock, config);
    let (first, second) = h.two_files().await;

    match h.replicator.replay(false).await.unwrap() {
        ReplayOutcome::TimedOut(stats) => {
            assert_eq!(stats.files, 1);
            assert_eq!(stats.cursor, first);
        }
        other => panic!("unexpected outcome: {other}"),
    }
    assert_eq!(h.registrars(), vec!["A", "B"]);

    match h.replicator.replay(false).await.unwrap() {
        ReplayOutcome::TimedOut(stats) => assert_eq!(stats.cursor, second),
        other => panic!("unexpected outcome: {other}"),
    }
    assert_eq!(h.registrars(), vec!["A", "D", "E"]);
}

#[tokio::test]
async fn test_replay_invalidates_cached_entities() {
    let h = Harness::new(MigrationPhase::DatastorePrimary);
    let d = key(EntityKind::Registrar, "D");
    let untouched = key(EntityKind::Registrar, "Z");
    h.cache.insert(d.clone(), CachedEntity::Absent);
    h.cache.insert(untouched.clone(), CachedEntity::Absent);

    h.two_files().await;
    h.replicator.replay(false).await.unwrap();

    assert!(h.cache.get(&d).is_none());
    assert_eq!(h.cache.get(&untouched), Some(CachedEntity::Absent));

    let loaded = h.cache.get_or_load(&d, |k| h.secondary.load(k)).unwrap();
    assert_eq!(loaded, Some(payload("D")));
}

#[tokio::test]
async fn test_tick_runs_the_whole_pipeline() {
    let h = Harness::new(MigrationPhase::DatastorePrimary);
    h.commit(
        Transaction::new(at(5_000), 1).add_update(EntityKind::Registrar, "A", payload("A")),
    );

    let report = h.replicator.tick().await.unwrap();
    assert!(matches!(report.checkpoint, CheckpointSave::Saved { .. }));
    assert_eq!(report.exports.len(), 1);
    assert!(report.abandoned.is_empty());
    assert_eq!(report.replay.stats().map(|s| s.files), Some(1));
    assert_eq!(h.registrars(), vec!["A"]);

    // Same clock reading: the checkpoint is not newer, nothing new to do.
    let report = h.replicator.tick().await.unwrap();
    assert!(matches!(report.checkpoint, CheckpointSave::Superseded { .. }));
    assert!(report.exports.is_empty());
    assert_eq!(report.replay.stats().map(|s| s.files), Some(0));
}

#[tokio::test]
async fn test_pending_diffs_track_the_cursor() {
    let h = Harness::new(MigrationPhase::DatastorePrimary);
    let (_, second) = h.two_files().await;
    assert_eq!(h.replicator.pending_diffs().await.unwrap().len(), 2);

    h.replicator.replay(false).await.unwrap();
    assert!(h.replicator.pending_diffs().await.unwrap().is_empty());
    assert_eq!(h.secondary.get_cursor().unwrap(), second);
}
