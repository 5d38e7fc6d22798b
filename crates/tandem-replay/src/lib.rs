//! Replay: applying exported commit-log diffs to the secondary store
//!
//! Reads diff files from blob storage and applies them in checkpoint order.
//!
//! Key features:
//! - Contiguity check over the listed diff files (a gap is fatal)
//! - Dependency-safe ordering of writes inside each transaction
//! - One atomic unit per diff file, cursor included
//! - Lease lock per scope, replay timeout, dry-run preview

pub mod catalog;
pub mod engine;
pub mod ordering;

pub use catalog::{DiffCatalog, DiffDescriptor};
pub use engine::{ReplayEngine, ReplayOutcome, ReplayState, ReplayStats};
pub use ordering::order_for_replay;
