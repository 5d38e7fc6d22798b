//! Tandem Prelude
//!
//! Import this to get all commonly used types and traits:
//!
//! ```
//! use tandem::prelude::*;
//! ```

// Core types
pub use crate::{
    Checkpoint, EntityKey, EntityKind, EntityPayload, ExportJob, Operation, Result, TandemError,
    Transaction,
};

// Configs
pub use crate::{CacheConfig, CheckpointConfig, ExportConfig, ReplayConfig, SqliteConfig};

// Traits
pub use crate::{
    BlobStore, CheckpointStore, Clock, CommitLogSource, ExportQueue, LivenessChecker, LockStore,
    MigrationPhaseSource, SecondaryStore, SecondaryTxn,
};

// Implementations
pub use crate::{
    LocalBlobStore, MemoryBlobStore, MemoryCheckpointStore, MemoryCommitLog, MemoryExportQueue,
    MemorySecondaryStore, SqliteLockStore, SqliteSecondaryStore,
};

// Replication
pub use crate::{
    CheckpointTrigger, DiffExporter, ExportMonitor, ReplayEngine, ReplayOutcome,
    ReplicationService, Replicator,
};

// Locking and phases
pub use crate::{
    FixedPhase, LockService, MigrationPhase, MigrationSchedule, ProcessLivenessChecker,
    RequestRegistry,
};

// Time
pub use crate::{FakeClock, SystemClock};

// Re-export common external deps
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use std::sync::Arc;
pub use tracing;
