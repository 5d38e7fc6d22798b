use crate::secondary_err;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::Connection;
use tandem_core::error::{Result, TandemError};

/// Current layout version of the secondary database.
pub const SCHEMA_VERSION: u32 = 1;

/// Create tables if needed and seed the metadata row.
///
/// The cursor is stored as milliseconds since the epoch; 0 means nothing
/// has been replayed yet.
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS replication_meta (
            id INTEGER PRIMARY KEY CHECK (id = 0),
            cursor_ms INTEGER NOT NULL DEFAULT 0,
            schema_version INTEGER NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE TABLE IF NOT EXISTS entities (
            kind TEXT NOT NULL,
            id TEXT NOT NULL,
            schema_version INTEGER NOT NULL,
            payload TEXT NOT NULL,
            PRIMARY KEY (kind, id)
        );
        CREATE TABLE IF NOT EXISTS locks (
            resource_name TEXT NOT NULL,
            scope TEXT NOT NULL,
            holder_id TEXT NOT NULL,
            acquired_ms INTEGER NOT NULL,
            expiration_ms INTEGER NOT NULL,
            PRIMARY KEY (resource_name, scope)
        );",
    )
    .map_err(secondary_err)?;

    conn.execute(
        "INSERT OR IGNORE INTO replication_meta (id, cursor_ms, schema_version)
         VALUES (0, 0, ?1)",
        [SCHEMA_VERSION as i64],
    )
    .map_err(secondary_err)?;

    let version = schema_version(conn)?;
    if version > SCHEMA_VERSION {
        return Err(TandemError::InvalidState(format!(
            "database schema version {version} is newer than supported version {SCHEMA_VERSION}"
        )));
    }
    Ok(())
}

pub fn schema_version(conn: &Connection) -> Result<u32> {
    conn.query_row(
        "SELECT schema_version FROM replication_meta WHERE id = 0",
        [],
        |row| {
            let v: i64 = row.get(0)?;
            Ok(v as u32)
        },
    )
    .map_err(secondary_err)
}

pub(crate) fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| TandemError::Deserialization(format!("timestamp out of range: {ms}")))
}
