//! Tandem Core: traits and types for replicating a commit log between two stores
//!
//! This crate defines the building blocks shared by the replication crates:
//! - Checkpoints over a sharded commit log and the diff files exported between them
//! - Transactions: ordered mutations and deletions of one source commit, with a
//!   versioned self-describing wire form
//! - A closed entity-kind table with dependency weights and a kind registry
//! - Collaborator traits: commit log source, secondary store, blob store,
//!   checkpoint store, migration phase
//! - A lease-based distributed lock with liveness-based takeover
//! - An explicitly owned entity cache and an injectable clock

pub mod cache;
pub mod clock;
pub mod config;
pub mod diff;
pub mod error;
pub mod lock;
pub mod observe;
pub mod registry;
pub mod traits;
pub mod types;

pub use cache::{CacheStats, CachedEntity, EntityCache};
pub use clock::{start_of_time, Clock, FakeClock, SystemClock};
pub use config::{
    CacheConfig, CheckpointConfig, ExportConfig, ReplayConfig, SqliteConfig, SynchronousMode,
};
pub use diff::{DiffFile, DiffFileHeader, DiffFileName};
pub use error::{Result, TandemError};
pub use lock::{
    InMemoryLockStore, LivenessChecker, Lock, LockMetrics, LockRow, LockService, LockState,
    LockStore, ObservedLockMetrics,
};
pub use registry::{KindDescriptor, KindRegistry};
pub use traits::{
    BlobMetadata, BlobStore, CheckpointStore, CommitLogSource, CommitManifest, CommitMutation,
    ExportQueue, MigrationPhase, MigrationPhaseSource, SecondaryStore, SecondaryTxn,
};
pub use types::{
    BucketId, Checkpoint, CheckpointSave, EntityKey, EntityKind, EntityPayload, ExportJob,
    Mutation, Operation, Transaction,
};
