use crate::error::Result;
use crate::types::{EntityKey, EntityKind, EntityPayload, Operation};
use chrono::{DateTime, Utc};

/// One atomic unit of writes against the secondary store.
///
/// Note: Not required to be Send, as some backends have thread-affine transactions
pub trait SecondaryTxn {
    /// Insert or overwrite a row.
    fn put(&mut self, key: &EntityKey, payload: &EntityPayload) -> Result<()>;

    /// Delete a row; deleting an absent row is a no-op.
    fn delete(&mut self, key: &EntityKey) -> Result<()>;

    fn apply(&mut self, op: &Operation) -> Result<()> {
        match op {
            Operation::Mutation(m) => self.put(&m.key, &m.payload),
            Operation::Deletion(key) => self.delete(key),
        }
    }

    /// Commit every write of this unit together with the new replication cursor.
    fn commit(self: Box<Self>, cursor: DateTime<Utc>) -> Result<()>;

    fn rollback(self: Box<Self>);
}

/// The store being kept in sync with the commit log.
///
/// Holds the entity rows plus the replication cursor: the upper checkpoint
/// time of the last diff file fully applied.
pub trait SecondaryStore: Send + Sync {
    type Txn<'a>: SecondaryTxn
    where
        Self: 'a;

    fn begin_txn(&self) -> Result<Self::Txn<'_>>;

    /// Current replication cursor; the start of time before the first commit.
    fn get_cursor(&self) -> Result<DateTime<Utc>>;

    fn load(&self, key: &EntityKey) -> Result<Option<EntityPayload>>;

    /// Ids of every stored row of `kind`, sorted.
    fn list_ids(&self, kind: EntityKind) -> Result<Vec<String>>;
}
