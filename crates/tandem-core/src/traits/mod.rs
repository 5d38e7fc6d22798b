pub mod blob;
pub mod checkpoint;
pub mod phase;
pub mod secondary;
pub mod source;

pub use blob::{BlobMetadata, BlobStore};
pub use checkpoint::{CheckpointStore, ExportQueue};
pub use phase::{MigrationPhase, MigrationPhaseSource};
pub use secondary::{SecondaryStore, SecondaryTxn};
pub use source::{CommitLogSource, CommitManifest, CommitMutation};
