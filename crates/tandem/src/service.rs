//! Replicator facade and the continuous replication service.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tandem::prelude::*;
//!
//! # async fn demo() -> Result<()> {
//! let log = Arc::new(MemoryCommitLog::new(4));
//! let replicator = Replicator::builder(Arc::new(MemorySecondaryStore::new()))
//!     .with_source(log)
//!     .with_checkpoints(Arc::new(MemoryCheckpointStore::new()))
//!     .with_queue(Arc::new(MemoryExportQueue::new()))
//!     .with_blobs(Arc::new(MemoryBlobStore::new()))
//!     .with_phase(Arc::new(FixedPhase(MigrationPhase::DatastorePrimary)))
//!     .build()?;
//!
//! let report = replicator.tick().await?;
//! println!("{}", report.replay);
//! # Ok(())
//! # }
//! ```

use crate::checkpoint::CheckpointTrigger;
use crate::export::{DiffExporter, ExportMonitor, ExportReport, ExportStatus};
use crate::liveness::ProcessLivenessChecker;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tandem_core::{
    error::{Result, TandemError},
    lock::{InMemoryLockStore, LivenessChecker, LockService, LockStore},
    traits::{
        BlobStore, CheckpointStore, CommitLogSource, ExportQueue, MigrationPhaseSource,
        SecondaryStore,
    },
    types::{CheckpointSave, ExportJob},
    CheckpointConfig, Clock, EntityCache, ExportConfig, KindRegistry, ReplayConfig, SystemClock,
};
use tandem_replay::{DiffDescriptor, ReplayEngine, ReplayOutcome};
use tokio::sync::Notify;
use tracing::{error, info, warn};

/// Result of one [`Replicator::tick`].
#[derive(Debug)]
pub struct TickReport {
    pub checkpoint: CheckpointSave,
    pub exports: Vec<ExportReport>,
    pub abandoned: Vec<ExportJob>,
    pub replay: ReplayOutcome,
}

/// Wires checkpointing, diff export and replay over one set of
/// collaborators.
pub struct Replicator<S: SecondaryStore> {
    trigger: CheckpointTrigger,
    exporter: DiffExporter,
    monitor: ExportMonitor,
    queue: Arc<dyn ExportQueue>,
    engine: ReplayEngine<S>,
}

impl<S: SecondaryStore> Replicator<S> {
    pub fn builder(secondary: Arc<S>) -> ReplicatorBuilder<S> {
        ReplicatorBuilder::new(secondary)
    }

    /// Compute and save a checkpoint, enqueueing its export.
    pub fn checkpoint(&self) -> Result<CheckpointSave> {
        self.trigger.run()
    }

    /// Export every queued diff file.
    pub async fn export_pending(&self) -> Result<Vec<ExportReport>> {
        self.exporter.drain(self.queue.as_ref()).await
    }

    /// Queued export jobs whose diff file is overdue.
    pub async fn abandoned_exports(&self) -> Result<Vec<ExportJob>> {
        let mut abandoned = Vec::new();
        for job in self.queue.pending()? {
            if let ExportStatus::Abandoned { .. } = self.monitor.check(&job).await? {
                abandoned.push(job);
            }
        }
        Ok(abandoned)
    }

    pub async fn replay(&self, dry_run: bool) -> Result<ReplayOutcome> {
        self.engine.run(dry_run).await
    }

    /// Diff files the secondary store has not applied yet.
    pub async fn pending_diffs(&self) -> Result<Vec<DiffDescriptor>> {
        self.engine.pending().await
    }

    /// One full pass: checkpoint, export, staleness check, replay.
    ///
    /// A failed export does not block the replay of files that were already
    /// exported.
    pub async fn tick(&self) -> Result<TickReport> {
        let checkpoint = self.checkpoint()?;
        let exports = match self.export_pending().await {
            Ok(exports) => exports,
            Err(e) => {
                warn!(error = %e, "Diff export failed, will retry on next tick");
                Vec::new()
            }
        };
        let abandoned = self.abandoned_exports().await?;
        let replay = self.replay(false).await?;
        Ok(TickReport {
            checkpoint,
            exports,
            abandoned,
            replay,
        })
    }

    pub fn engine(&self) -> &ReplayEngine<S> {
        &self.engine
    }
}

/// Builder for [`Replicator`].
///
/// Source, checkpoint store, export queue, blob store and migration phase
/// are required. Everything else has a default: the system clock, an
/// in-process lock store, a `<pid>@<host>` liveness checker and default
/// configs.
pub struct ReplicatorBuilder<S: SecondaryStore> {
    secondary: Arc<S>,
    source: Option<Arc<dyn CommitLogSource>>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    queue: Option<Arc<dyn ExportQueue>>,
    blobs: Option<Arc<dyn BlobStore>>,
    phase: Option<Arc<dyn MigrationPhaseSource>>,
    locks: Arc<dyn LockStore>,
    liveness: Arc<dyn LivenessChecker>,
    clock: Arc<dyn Clock>,
    cache: Option<Arc<EntityCache>>,
    registry: Option<Arc<KindRegistry>>,
    replay_config: ReplayConfig,
    export_config: ExportConfig,
}

impl<S: SecondaryStore> ReplicatorBuilder<S> {
    pub fn new(secondary: Arc<S>) -> Self {
        Self {
            secondary,
            source: None,
            checkpoints: None,
            queue: None,
            blobs: None,
            phase: None,
            locks: Arc::new(InMemoryLockStore::new()),
            liveness: Arc::new(ProcessLivenessChecker::from_env()),
            clock: Arc::new(SystemClock),
            cache: None,
            registry: None,
            replay_config: ReplayConfig::default(),
            export_config: ExportConfig::default(),
        }
    }

    pub fn with_source(mut self, source: Arc<dyn CommitLogSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_checkpoints(mut self, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(checkpoints);
        self
    }

    pub fn with_queue(mut self, queue: Arc<dyn ExportQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn with_blobs(mut self, blobs: Arc<dyn BlobStore>) -> Self {
        self.blobs = Some(blobs);
        self
    }

    pub fn with_phase(mut self, phase: Arc<dyn MigrationPhaseSource>) -> Self {
        self.phase = Some(phase);
        self
    }

    pub fn with_lock_store(mut self, locks: Arc<dyn LockStore>) -> Self {
        self.locks = locks;
        self
    }

    pub fn with_liveness(mut self, liveness: Arc<dyn LivenessChecker>) -> Self {
        self.liveness = liveness;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_cache(mut self, cache: Arc<EntityCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_registry(mut self, registry: Arc<KindRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_replay_config(mut self, config: ReplayConfig) -> Self {
        self.replay_config = config;
        self
    }

    pub fn with_export_config(mut self, config: ExportConfig) -> Self {
        self.export_config = config;
        self
    }

    pub fn build(self) -> Result<Replicator<S>> {
        let source = required(self.source, "commit log source")?;
        let checkpoints = required(self.checkpoints, "checkpoint store")?;
        let queue = required(self.queue, "export queue")?;
        let blobs = required(self.blobs, "blob store")?;
        let phase = required(self.phase, "migration phase source")?;

        let locks = LockService::new(self.locks, self.clock.clone());
        let mut engine = ReplayEngine::new(
            self.secondary,
            blobs.clone(),
            locks,
            self.liveness,
            phase,
            self.clock.clone(),
            self.replay_config,
        )?;
        if let Some(cache) = self.cache {
            engine = engine.with_cache(cache);
        }
        if let Some(registry) = self.registry {
            engine = engine.with_registry(registry);
        }

        Ok(Replicator {
            trigger: CheckpointTrigger::new(
                source.clone(),
                checkpoints.clone(),
                queue.clone(),
                self.clock.clone(),
            ),
            exporter: DiffExporter::new(source, checkpoints, blobs.clone()),
            monitor: ExportMonitor::new(blobs, self.clock, self.export_config),
            queue,
            engine,
        })
    }
}

fn required<T>(value: Option<T>, what: &str) -> Result<T> {
    value.ok_or_else(|| TandemError::InvalidArgument(format!("Replicator requires a {what}")))
}

/// Runs [`Replicator::tick`] on a fixed interval until shut down.
pub struct ReplicationService<S: SecondaryStore> {
    replicator: Arc<Replicator<S>>,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl<S: SecondaryStore> ReplicationService<S> {
    pub fn new(replicator: Arc<Replicator<S>>, config: &CheckpointConfig) -> Self {
        Self {
            replicator,
            interval: config.interval(),
            shutdown: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            shutdown: self.shutdown.clone(),
            wake: self.wake.clone(),
        }
    }

    /// Tick until shutdown is signaled. Returns the number of completed
    /// ticks; failed ticks are logged and retried on the next interval.
    pub async fn run(&self) -> u64 {
        let mut ticks = 0;
        info!(interval = ?self.interval, "Replication service started");
        while !self.shutdown.load(Ordering::SeqCst) {
            match self.replicator.tick().await {
                Ok(report) => {
                    ticks += 1;
                    for job in &report.abandoned {
                        error!(upper = %job.upper, "Diff export abandoned");
                    }
                }
                Err(e) => error!(error = %e, "Replication tick failed"),
            }
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.wake.notified() => {}
            }
        }
        info!(ticks, "Replication service shutdown");
        ticks
    }
}

/// Handle for stopping a running [`ReplicationService`].
#[derive(Clone)]
pub struct ShutdownHandle {
    shutdown: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}
