//! Tandem: keeps a secondary store in step with a sharded commit log
//!
//! Tandem provides the replication path used while migrating between two
//! datastores:
//! - **Checkpoints**: per-bucket cuts of the commit log that are safe to export
//! - **Diff export**: every commit between two checkpoints, written once to blob storage
//! - **Replay**: diff files applied to the secondary store in dependency-safe
//!   order, one atomic unit per file, under a lease lock
//! - **Migration phases**: replay only runs while the secondary is being fed
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use tandem::prelude::*;
//!
//! # async fn demo() -> Result<()> {
//! let log = Arc::new(MemoryCommitLog::new(4));
//! log.commit(
//!     &Transaction::new(Utc::now(), 1)
//!         .add_update(EntityKind::Registrar, "r1", EntityPayload::v1(serde_json::json!({}))),
//! )?;
//!
//! let secondary = Arc::new(SqliteSecondaryStore::open_in_memory()?);
//! let replicator = Replicator::builder(secondary)
//!     .with_source(log)
//!     .with_checkpoints(Arc::new(MemoryCheckpointStore::new()))
//!     .with_queue(Arc::new(MemoryExportQueue::new()))
//!     .with_blobs(Arc::new(LocalBlobStore::new("./diffs")))
//!     .with_phase(Arc::new(FixedPhase(MigrationPhase::DatastorePrimary)))
//!     .build()?;
//!
//! replicator.checkpoint()?;
//! replicator.export_pending().await?;
//! println!("{}", replicator.replay(false).await?);
//! # Ok(())
//! # }
//! ```

pub mod blob;
pub mod checkpoint;
pub mod export;
pub mod liveness;
pub mod memory;
pub mod phase;
pub mod prelude;
pub mod service;

// Re-export core types
pub use tandem_core::{
    clock::{start_of_time, Clock, FakeClock, SystemClock},
    config::{
        CacheConfig, CheckpointConfig, ExportConfig, ReplayConfig, SqliteConfig, SynchronousMode,
    },
    diff::{format_time, parse_time, DiffFile, DiffFileHeader, DiffFileName},
    error::{Result, TandemError},
    lock::{
        InMemoryLockStore, LivenessChecker, Lock, LockRow, LockService, LockState, LockStore,
    },
    registry::{KindDescriptor, KindRegistry},
    traits::{
        BlobMetadata, BlobStore, CheckpointStore, CommitLogSource, CommitManifest,
        CommitMutation, ExportQueue, MigrationPhase, MigrationPhaseSource, SecondaryStore,
        SecondaryTxn,
    },
    types::{
        BucketId, Checkpoint, CheckpointSave, EntityKey, EntityKind, EntityPayload, ExportJob,
        Mutation, Operation, Transaction,
    },
    CachedEntity, EntityCache,
};

// Re-export implementations
pub use tandem_replay::{
    order_for_replay, DiffCatalog, DiffDescriptor, ReplayEngine, ReplayOutcome, ReplayState,
    ReplayStats,
};
pub use tandem_sqlite::{SqliteLockStore, SqliteSecondaryStore};

// Re-export main types from this crate
pub use blob::{LocalBlobStore, MemoryBlobStore};
pub use checkpoint::{CheckpointStrategy, CheckpointTrigger};
pub use export::{DiffExporter, ExportMonitor, ExportReport, ExportStatus};
pub use liveness::{ProcessLivenessChecker, RequestGuard, RequestRegistry};
pub use memory::{
    JournalEntry, MemoryCheckpointStore, MemoryCommitLog, MemoryExportQueue,
    MemorySecondaryStore, MemorySecondaryTxn,
};
pub use phase::{FixedPhase, MigrationSchedule, PhaseTransition};
pub use service::{ReplicationService, Replicator, ReplicatorBuilder, ShutdownHandle, TickReport};
