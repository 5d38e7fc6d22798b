//! Diff export and export staleness monitoring.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tandem_core::{
    clock::{start_of_time, Clock},
    diff::{
        format_time, DiffFile, DiffFileHeader, DiffFileName, LOWER_BOUND_CHECKPOINT,
        TRANSACTION_COUNT, UPPER_BOUND_CHECKPOINT,
    },
    error::{Result, TandemError},
    observe,
    traits::{BlobMetadata, BlobStore, CheckpointStore, CommitLogSource, ExportQueue},
    types::{Checkpoint, ExportJob, Transaction},
    ExportConfig,
};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReport {
    pub name: DiffFileName,
    pub transactions: usize,
    /// `false` when the diff file already existed and nothing was written.
    pub written: bool,
}

/// Writes every commit between two saved checkpoints into one diff file.
///
/// Stateless: failures propagate and the export is retried by whoever
/// scheduled it. Diff files are write-once, so retrying an export that
/// already succeeded is a no-op.
pub struct DiffExporter {
    source: Arc<dyn CommitLogSource>,
    checkpoints: Arc<dyn CheckpointStore>,
    blobs: Arc<dyn BlobStore>,
}

impl DiffExporter {
    pub fn new(
        source: Arc<dyn CommitLogSource>,
        checkpoints: Arc<dyn CheckpointStore>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            source,
            checkpoints,
            blobs,
        }
    }

    pub async fn export(&self, job: &ExportJob) -> Result<ExportReport> {
        let started = Instant::now();
        let name = DiffFileName::for_checkpoint(job.upper);
        let blob = name.to_string();

        if self.blobs.exists(&blob).await? {
            debug!(%name, "Diff file already exported");
            observe::record_export(started.elapsed(), 0, false);
            return Ok(ExportReport {
                name,
                transactions: 0,
                written: false,
            });
        }

        let upper = self.load_checkpoint(job.upper)?;
        let lower = if job.lower == start_of_time() {
            Checkpoint::start_of_time(self.source.bucket_ids())
        } else {
            self.load_checkpoint(job.lower)?
        };
        let transactions = self.collect_transactions(&lower, &upper)?;
        let count = transactions.len();

        let bytes = DiffFile::new(
            DiffFileHeader {
                lower: job.lower,
                upper,
            },
            transactions,
        )
        .encode()?;
        let metadata = BlobMetadata::from([
            (LOWER_BOUND_CHECKPOINT.to_string(), format_time(job.lower)),
            (UPPER_BOUND_CHECKPOINT.to_string(), format_time(job.upper)),
            (TRANSACTION_COUNT.to_string(), count.to_string()),
        ]);
        let written = self.blobs.write(&blob, bytes, metadata).await?;

        observe::record_export(started.elapsed(), count, written);
        if written {
            info!(%name, transactions = count, "Exported diff file");
        } else {
            warn!(%name, "Diff file appeared during export; kept the existing one");
        }
        Ok(ExportReport {
            name,
            transactions: count,
            written,
        })
    }

    /// Export every pending job in queue order, completing each one as it
    /// succeeds. Stops at the first failure.
    pub async fn drain(&self, queue: &dyn ExportQueue) -> Result<Vec<ExportReport>> {
        let mut reports = Vec::new();
        for job in queue.pending()? {
            reports.push(self.export(&job).await?);
            queue.complete(&job)?;
        }
        Ok(reports)
    }

    fn load_checkpoint(&self, time: DateTime<Utc>) -> Result<Checkpoint> {
        self.checkpoints.load(time)?.ok_or_else(|| {
            TandemError::NotFound(format!("checkpoint at {}", format_time(time)))
        })
    }

    /// One transaction per manifest in `(lower, upper]` of each bucket,
    /// ordered by commit time then bucket.
    fn collect_transactions(
        &self,
        lower: &Checkpoint,
        upper: &Checkpoint,
    ) -> Result<Vec<Transaction>> {
        let mut transactions = Vec::new();
        for bucket in self.source.bucket_ids() {
            let manifests = self.source.manifests_between(
                bucket,
                lower.bucket_time(bucket),
                upper.bucket_time(bucket),
            )?;
            for manifest in manifests {
                let mut tx = Transaction::new(manifest.commit_time, manifest.bucket);
                for mutation in self.source.mutations_of(&manifest)? {
                    tx = tx.add_update(mutation.key.kind, mutation.key.id, mutation.payload);
                }
                for key in manifest.deletions {
                    tx = tx.add_delete(key.kind, key.id);
                }
                transactions.push(tx);
            }
        }
        transactions.sort_by_key(|tx| (tx.commit_time, tx.bucket));
        Ok(transactions)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportStatus {
    Complete,
    Pending { age: chrono::Duration },
    Abandoned { name: DiffFileName, age: chrono::Duration },
}

impl fmt::Display for ExportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportStatus::Complete => f.write_str("complete"),
            ExportStatus::Pending { age } => {
                write!(f, "pending for {}", format_age(*age))
            }
            ExportStatus::Abandoned { name, age } => write!(
                f,
                "Diff export {name} abandoned - not complete after {}",
                format_age(*age)
            ),
        }
    }
}

fn format_age(age: chrono::Duration) -> String {
    let total = age.num_seconds().max(0);
    format!(
        "{} hours, {} minutes and {} seconds",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

/// Flags export jobs whose diff file never showed up.
pub struct ExportMonitor {
    blobs: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
    config: ExportConfig,
}

impl ExportMonitor {
    pub fn new(blobs: Arc<dyn BlobStore>, clock: Arc<dyn Clock>, config: ExportConfig) -> Self {
        Self {
            blobs,
            clock,
            config,
        }
    }

    pub async fn check(&self, job: &ExportJob) -> Result<ExportStatus> {
        let name = DiffFileName::for_checkpoint(job.upper);
        if self.blobs.exists(&name.to_string()).await? {
            return Ok(ExportStatus::Complete);
        }
        let age = self.clock.now() - job.upper;
        let threshold = chrono::Duration::from_std(self.config.staleness_threshold())
            .map_err(|e| TandemError::Config(format!("export staleness threshold: {e}")))?;
        if age < threshold {
            Ok(ExportStatus::Pending { age })
        } else {
            let status = ExportStatus::Abandoned { name, age };
            warn!("{status}");
            Ok(status)
        }
    }
}
