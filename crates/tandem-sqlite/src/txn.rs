use crate::schema::from_millis;
use crate::secondary_err;
use chrono::{DateTime, Utc};
use parking_lot::MutexGuard;
use rusqlite::{params, Connection};
use tandem_core::{
    error::{Result, TandemError},
    traits::SecondaryTxn,
    types::{EntityKey, EntityPayload},
};
use tracing::trace;

/// Write transaction over the secondary database.
///
/// Holds the connection for its whole lifetime and rolls back on drop
/// unless committed.
pub struct SqliteReplayTxn<'a> {
    conn: MutexGuard<'a, Connection>,
    in_txn: bool,
    writes: usize,
}

impl<'a> SqliteReplayTxn<'a> {
    pub fn new(conn: MutexGuard<'a, Connection>) -> Result<Self> {
        conn.execute("BEGIN IMMEDIATE TRANSACTION", [])
            .map_err(secondary_err)?;

        Ok(Self {
            conn,
            in_txn: true,
            writes: 0,
        })
    }
}

impl<'a> SecondaryTxn for SqliteReplayTxn<'a> {
    fn put(&mut self, key: &EntityKey, payload: &EntityPayload) -> Result<()> {
        let body = serde_json::to_string(&payload.data)
            .map_err(|e| TandemError::Serialization(e.to_string()))?;
        self.conn
            .execute(
                "INSERT OR REPLACE INTO entities (kind, id, schema_version, payload)
                 VALUES (?1, ?2, ?3, ?4)",
                params![key.kind.name(), key.id, payload.schema_version as i64, body],
            )
            .map_err(secondary_err)?;
        self.writes += 1;
        Ok(())
    }

    fn delete(&mut self, key: &EntityKey) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM entities WHERE kind = ?1 AND id = ?2",
                params![key.kind.name(), key.id],
            )
            .map_err(secondary_err)?;
        self.writes += 1;
        Ok(())
    }

    fn commit(mut self: Box<Self>, cursor: DateTime<Utc>) -> Result<()> {
        if !self.in_txn {
            return Ok(());
        }

        let current: i64 = self
            .conn
            .query_row(
                "SELECT cursor_ms FROM replication_meta WHERE id = 0",
                [],
                |row| row.get(0),
            )
            .map_err(secondary_err)?;
        if cursor.timestamp_millis() < current {
            return Err(TandemError::InvalidState(format!(
                "replication cursor cannot move back from {} to {cursor}",
                from_millis(current)?
            )));
        }

        self.conn
            .execute(
                "UPDATE replication_meta SET cursor_ms = ?1, updated_at = datetime('now') WHERE id = 0",
                [cursor.timestamp_millis()],
            )
            .map_err(secondary_err)?;

        self.conn.execute("COMMIT", []).map_err(secondary_err)?;
        self.in_txn = false;
        trace!(writes = self.writes, %cursor, "Committed replay transaction");
        Ok(())
    }

    fn rollback(mut self: Box<Self>) {
        if self.in_txn {
            let _ = self.conn.execute("ROLLBACK", []);
            self.in_txn = false;
        }
    }
}

impl<'a> Drop for SqliteReplayTxn<'a> {
    fn drop(&mut self) {
        if self.in_txn {
            let _ = self.conn.execute("ROLLBACK", []);
        }
    }
}
