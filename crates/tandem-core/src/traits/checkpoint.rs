use crate::error::Result;
use crate::types::{Checkpoint, CheckpointSave, ExportJob};
use chrono::{DateTime, Utc};

/// Persistent checkpoints plus the root pointing at the latest one.
pub trait CheckpointStore: Send + Sync {
    /// Time of the latest saved checkpoint; the start of time when none.
    fn last_written_time(&self) -> Result<DateTime<Utc>>;

    fn load(&self, checkpoint_time: DateTime<Utc>) -> Result<Option<Checkpoint>>;

    /// Save `checkpoint` as the new root unless one at or after its time is
    /// already stored. `on_save` receives the previous root time and runs in
    /// the same atomic unit as the save; an error from it aborts the save.
    fn save_if_newer(
        &self,
        checkpoint: &Checkpoint,
        on_save: &mut dyn FnMut(DateTime<Utc>) -> Result<()>,
    ) -> Result<CheckpointSave>;
}

/// Queue of diff export jobs.
pub trait ExportQueue: Send + Sync {
    fn enqueue(&self, job: ExportJob) -> Result<()>;

    /// Jobs not yet completed, oldest first.
    fn pending(&self) -> Result<Vec<ExportJob>>;

    fn complete(&self, job: &ExportJob) -> Result<()>;
}
