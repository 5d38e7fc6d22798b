use crate::catalog::{DiffCatalog, DiffDescriptor};
use crate::ordering::order_for_replay;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tandem_core::{
    diff::{format_time, DiffFile, DiffFileName},
    error::{Result, TandemError},
    lock::{LivenessChecker, LockService},
    observe,
    traits::{BlobStore, MigrationPhaseSource, SecondaryStore, SecondaryTxn},
    Clock, EntityCache, KindRegistry, ReplayConfig,
};
use tracing::{debug, error, info, warn};

/// Progress of one replay run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayState {
    Idle,
    AcquiringLock,
    LoadingCursor,
    FetchingDiffs,
    Applying,
    AdvancingCursor,
    ReleasingLock,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayStats {
    pub files: u64,
    pub transactions: u64,
    pub cursor: DateTime<Utc>,
}

/// Result of a replay invocation. `Skipped` and `Aborted` are normal
/// outcomes, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayOutcome {
    /// Replication is inactive in the current migration phase.
    Skipped { reason: String },
    /// Another worker holds the replay lock.
    Aborted { reason: String },
    /// Every available diff file was applied.
    CaughtUp(ReplayStats),
    /// Stopped between files because the replay timeout elapsed.
    TimedOut(ReplayStats),
    /// Window the next real run would consume; nothing applied.
    DryRun {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        files: Vec<DiffFileName>,
        preview_limit: usize,
    },
}

impl ReplayOutcome {
    fn label(&self) -> &'static str {
        match self {
            ReplayOutcome::Skipped { .. } => "skipped",
            ReplayOutcome::Aborted { .. } => "aborted",
            ReplayOutcome::CaughtUp(_) => "caught_up",
            ReplayOutcome::TimedOut(_) => "timed_out",
            ReplayOutcome::DryRun { .. } => "dry_run",
        }
    }

    pub fn stats(&self) -> Option<&ReplayStats> {
        match self {
            ReplayOutcome::CaughtUp(stats) | ReplayOutcome::TimedOut(stats) => Some(stats),
            _ => None,
        }
    }
}

impl fmt::Display for ReplayOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplayOutcome::Skipped { reason } => write!(f, "SKIPPED {reason}"),
            ReplayOutcome::Aborted { reason } => write!(f, "ABORTED {reason}"),
            ReplayOutcome::CaughtUp(stats) => write!(
                f,
                "Caught up after replaying {} file(s) containing {} transaction(s), cursor={}",
                stats.files,
                stats.transactions,
                format_time(stats.cursor)
            ),
            ReplayOutcome::TimedOut(stats) => write!(
                f,
                "Ran out of time after replaying {} file(s) containing {} transaction(s), cursor={}",
                stats.files,
                stats.transactions,
                format_time(stats.cursor)
            ),
            ReplayOutcome::DryRun {
                start,
                end,
                files,
                preview_limit,
            } => {
                let preview: Vec<String> = files
                    .iter()
                    .take(*preview_limit)
                    .map(|name| name.to_string())
                    .collect();
                write!(
                    f,
                    "Running in dry-run mode, the first set of diff files processed would be \
                     from searching from {} to {} and would contain {} file(s). \
                     They are (limit {}): \n[{}]",
                    format_time(*start),
                    format_time(*end),
                    files.len(),
                    preview_limit,
                    preview.join(", ")
                )
            }
        }
    }
}

/// Applies exported diff files to the secondary store.
pub struct ReplayEngine<S: SecondaryStore> {
    secondary: Arc<S>,
    blobs: Arc<dyn BlobStore>,
    catalog: DiffCatalog,
    locks: LockService,
    liveness: Arc<dyn LivenessChecker>,
    phase: Arc<dyn MigrationPhaseSource>,
    clock: Arc<dyn Clock>,
    registry: Arc<KindRegistry>,
    cache: Option<Arc<EntityCache>>,
    config: ReplayConfig,
}

impl<S: SecondaryStore> ReplayEngine<S> {
    pub fn new(
        secondary: Arc<S>,
        blobs: Arc<dyn BlobStore>,
        locks: LockService,
        liveness: Arc<dyn LivenessChecker>,
        phase: Arc<dyn MigrationPhaseSource>,
        clock: Arc<dyn Clock>,
        config: ReplayConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            catalog: DiffCatalog::new(blobs.clone(), config.list_concurrency),
            secondary,
            blobs,
            locks,
            liveness,
            phase,
            clock,
            registry: Arc::new(KindRegistry::standard()),
            cache: None,
            config,
        })
    }

    /// Invalidate written keys in `cache` after every committed file.
    pub fn with_cache(mut self, cache: Arc<EntityCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_registry(mut self, registry: Arc<KindRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    pub fn secondary(&self) -> &Arc<S> {
        &self.secondary
    }

    /// Diff files not yet applied, as of now.
    pub async fn pending(&self) -> Result<Vec<DiffDescriptor>> {
        let cursor = self.secondary.get_cursor()?;
        self.catalog.list(cursor, self.clock.now()).await
    }

    /// Run one replay invocation.
    ///
    /// Loops until no diff files remain or the replay timeout elapses. Fatal
    /// conditions (a gap between files, an undecodable file, a failed write)
    /// are returned as errors with the cursor left at the last fully applied
    /// file.
    pub async fn run(&self, dry_run: bool) -> Result<ReplayOutcome> {
        let started = Instant::now();
        let outcome = self.run_inner(dry_run).await;
        match &outcome {
            Ok(outcome) => {
                let (files, transactions) = outcome
                    .stats()
                    .map(|s| (s.files, s.transactions))
                    .unwrap_or_default();
                observe::record_replay_run(started.elapsed(), outcome.label(), files, transactions);
                info!(scope = %self.config.lock_scope, "{outcome}");
            }
            Err(e) => {
                observe::record_replay_run(started.elapsed(), "failed", 0, 0);
                error!(scope = %self.config.lock_scope, error = %e, "Replay failed");
            }
        }
        outcome
    }

    async fn run_inner(&self, dry_run: bool) -> Result<ReplayOutcome> {
        let mut state = ReplayState::Idle;

        let phase = self.phase.phase_at(self.clock.now());
        if !phase.replicates_to_secondary() {
            return Ok(ReplayOutcome::Skipped {
                reason: format!("Replay is inactive in migration phase {phase}"),
            });
        }

        if dry_run {
            return self.dry_run().await;
        }

        self.enter(&mut state, ReplayState::AcquiringLock);
        let Some(lock) = self.locks.acquire(
            &self.config.lock_resource,
            &self.config.lock_scope,
            self.config.lease_length(),
            self.liveness.as_ref(),
        )?
        else {
            return Ok(ReplayOutcome::Aborted {
                reason: format!("Can't acquire lock {}", self.config.lock_resource),
            });
        };

        let result = self.replay_locked(&mut state).await;

        self.enter(&mut state, ReplayState::ReleasingLock);
        let released = lock.release();
        self.enter(&mut state, ReplayState::Done);

        match (result, released) {
            (Ok(outcome), Ok(())) => Ok(outcome),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(release_err)) => {
                warn!(error = %release_err, "Failed to release replay lock after error");
                Err(e)
            }
        }
    }

    async fn dry_run(&self) -> Result<ReplayOutcome> {
        let start = self.secondary.get_cursor()?;
        let end = self.clock.now();
        let files = self.catalog.list(start, end).await?;
        Ok(ReplayOutcome::DryRun {
            start,
            end,
            files: files.into_iter().map(|f| f.name).collect(),
            preview_limit: self.config.dry_run_preview_limit,
        })
    }

    async fn replay_locked(&self, state: &mut ReplayState) -> Result<ReplayOutcome> {
        self.enter(state, ReplayState::LoadingCursor);
        let started = self.clock.now();
        let timeout = chrono::Duration::from_std(self.config.replay_timeout())
            .map_err(|e| TandemError::Config(format!("replay timeout: {e}")))?;
        let mut stats = ReplayStats {
            files: 0,
            transactions: 0,
            cursor: self.secondary.get_cursor()?,
        };

        loop {
            self.enter(state, ReplayState::FetchingDiffs);
            let files = self.catalog.list(stats.cursor, self.clock.now()).await?;
            if files.is_empty() {
                return Ok(ReplayOutcome::CaughtUp(stats));
            }

            for descriptor in files {
                self.enter(state, ReplayState::Applying);
                let diff = self.read_diff(&descriptor).await?;
                let applied = self.apply_file(&diff)?;

                self.enter(state, ReplayState::AdvancingCursor);
                stats.files += 1;
                stats.transactions += applied as u64;
                stats.cursor = descriptor.upper();
                debug!(
                    file = %descriptor.name,
                    transactions = applied,
                    cursor = %stats.cursor,
                    "Applied diff file"
                );

                if self.clock.now() - started >= timeout {
                    return Ok(ReplayOutcome::TimedOut(stats));
                }
            }
        }
    }

    async fn read_diff(&self, descriptor: &DiffDescriptor) -> Result<DiffFile> {
        let name = descriptor.name.to_string();
        let bytes = self.blobs.read(&name).await?;
        let diff = DiffFile::decode(&bytes, &self.registry)?;
        if diff.header.lower != descriptor.lower
            || diff.header.upper.checkpoint_time != descriptor.upper()
        {
            return Err(TandemError::Deserialization(format!(
                "{name}: header covers ({}, {}], listing says ({}, {}]",
                format_time(diff.header.lower),
                format_time(diff.header.upper.checkpoint_time),
                format_time(descriptor.lower),
                format_time(descriptor.upper())
            )));
        }
        Ok(diff)
    }

    /// Apply every transaction of `diff` and advance the cursor in one
    /// atomic unit. Returns the number of transactions in the file.
    fn apply_file(&self, diff: &DiffFile) -> Result<usize> {
        let mut txn = Box::new(self.secondary.begin_txn()?);
        let mut touched = Vec::new();

        for tx in &diff.transactions {
            for op in order_for_replay(tx) {
                if let Err(e) = txn.apply(op) {
                    txn.rollback();
                    return Err(e);
                }
                touched.push(op.key().clone());
            }
        }
        txn.commit(diff.header.upper.checkpoint_time)?;

        if let Some(cache) = &self.cache {
            cache.invalidate(&touched);
        }
        Ok(diff.transactions.len())
    }

    fn enter(&self, state: &mut ReplayState, next: ReplayState) {
        debug!(from = ?*state, to = ?next, scope = %self.config.lock_scope, "Replay state");
        *state = next;
    }
}
