mod checkpoint;
mod kind;
mod transaction;

pub use checkpoint::{BucketId, Checkpoint, CheckpointSave, ExportJob};
pub use kind::EntityKind;
pub use transaction::{
    EntityKey, EntityPayload, Mutation, Operation, Transaction, TRANSACTION_FORMAT_VERSION,
};
