use crate::schema::from_millis;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::sync::Arc;
use tandem_core::{
    error::{Result, TandemError},
    lock::{LockRow, LockStore},
};

fn lock_err(e: rusqlite::Error) -> TandemError {
    TandemError::LockStore(e.to_string())
}

/// Lock rows in the `locks` table of the secondary database.
///
/// Every compare-and-set runs inside `BEGIN IMMEDIATE`, so it is atomic
/// across processes sharing the file as well as across threads.
#[derive(Clone)]
pub struct SqliteLockStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLockStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }
}

fn read_row(conn: &Connection, resource_name: &str, scope: &str) -> Result<Option<LockRow>> {
    let raw: Option<(String, i64, i64)> = conn
        .query_row(
            "SELECT holder_id, acquired_ms, expiration_ms FROM locks
             WHERE resource_name = ?1 AND scope = ?2",
            params![resource_name, scope],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()
        .map_err(lock_err)?;

    raw.map(|(holder_id, acquired_ms, expiration_ms)| {
        Ok(LockRow {
            resource_name: resource_name.to_string(),
            scope: scope.to_string(),
            holder_id,
            acquired_time: from_millis(acquired_ms)?,
            expiration_time: from_millis(expiration_ms)?,
        })
    })
    .transpose()
}

impl LockStore for SqliteLockStore {
    fn load(&self, resource_name: &str, scope: &str) -> Result<Option<LockRow>> {
        read_row(&self.conn.lock(), resource_name, scope)
    }

    fn compare_and_set(&self, expected: Option<&LockRow>, new: &LockRow) -> Result<bool> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(lock_err)?;

        let current = read_row(&tx, &new.resource_name, &new.scope)?;
        if current.as_ref() != expected {
            return Ok(false);
        }
        tx.execute(
            "INSERT OR REPLACE INTO locks
                (resource_name, scope, holder_id, acquired_ms, expiration_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                new.resource_name,
                new.scope,
                new.holder_id,
                new.acquired_time.timestamp_millis(),
                new.expiration_time.timestamp_millis()
            ],
        )
        .map_err(lock_err)?;
        tx.commit().map_err(lock_err)?;
        Ok(true)
    }

    fn delete_if_matches(&self, row: &LockRow) -> Result<bool> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(lock_err)?;

        let current = read_row(&tx, &row.resource_name, &row.scope)?;
        if current.as_ref() != Some(row) {
            return Ok(false);
        }
        tx.execute(
            "DELETE FROM locks WHERE resource_name = ?1 AND scope = ?2",
            params![row.resource_name, row.scope],
        )
        .map_err(lock_err)?;
        tx.commit().map_err(lock_err)?;
        Ok(true)
    }
}
