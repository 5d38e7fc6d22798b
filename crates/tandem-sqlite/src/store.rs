use crate::lock::SqliteLockStore;
use crate::schema::{self, from_millis};
use crate::secondary_err;
use crate::txn::SqliteReplayTxn;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::sync::Arc;
use std::time::Duration;
use tandem_core::{
    error::{Result, TandemError},
    traits::SecondaryStore,
    types::{EntityKey, EntityKind, EntityPayload},
    SqliteConfig,
};
use tracing::debug;

/// SQLite-backed secondary store
pub struct SqliteSecondaryStore {
    conn: Arc<Mutex<Connection>>,
    config: Option<SqliteConfig>,
}

impl SqliteSecondaryStore {
    pub fn open(cfg: SqliteConfig) -> Result<Self> {
        if let Some(parent) = cfg.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open_with_flags(
            &cfg.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )
        .map_err(secondary_err)?;

        Self::configure_connection(&conn, &cfg)?;
        schema::init_schema(&conn)?;
        debug!(path = %cfg.path.display(), "Opened SQLite secondary store");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            config: Some(cfg),
        })
    }

    /// Private in-memory database, mostly for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(secondary_err)?;
        schema::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            config: None,
        })
    }

    /// Lock store over the same database.
    pub fn lock_store(&self) -> SqliteLockStore {
        SqliteLockStore::new(self.conn.clone())
    }

    pub fn config(&self) -> Option<&SqliteConfig> {
        self.config.as_ref()
    }

    pub fn schema_version(&self) -> Result<u32> {
        schema::schema_version(&self.conn.lock())
    }

    /// Number of stored rows across all kinds.
    pub fn entity_count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM entities", [], |row| row.get(0))
            .map_err(secondary_err)?;
        Ok(count as u64)
    }

    fn configure_connection(conn: &Connection, cfg: &SqliteConfig) -> Result<()> {
        if cfg.wal_mode {
            conn.pragma_update(None, "journal_mode", "WAL")
                .map_err(|e| TandemError::Config(e.to_string()))?;
        }
        conn.pragma_update(None, "synchronous", cfg.synchronous.as_pragma())
            .map_err(|e| TandemError::Config(e.to_string()))?;
        conn.pragma_update(None, "cache_size", cfg.cache_size)
            .map_err(|e| TandemError::Config(e.to_string()))?;
        conn.busy_timeout(Duration::from_millis(cfg.busy_timeout_ms))
            .map_err(|e| TandemError::Config(e.to_string()))?;
        Ok(())
    }
}

impl SecondaryStore for SqliteSecondaryStore {
    type Txn<'a> = SqliteReplayTxn<'a>;

    fn begin_txn(&self) -> Result<Self::Txn<'_>> {
        SqliteReplayTxn::new(self.conn.lock())
    }

    fn get_cursor(&self) -> Result<DateTime<Utc>> {
        let conn = self.conn.lock();
        let cursor_ms: i64 = conn
            .query_row(
                "SELECT cursor_ms FROM replication_meta WHERE id = 0",
                [],
                |row| row.get(0),
            )
            .map_err(secondary_err)?;
        from_millis(cursor_ms)
    }

    fn load(&self, key: &EntityKey) -> Result<Option<EntityPayload>> {
        let conn = self.conn.lock();
        let row: Option<(i64, String)> = conn
            .query_row(
                "SELECT schema_version, payload FROM entities WHERE kind = ?1 AND id = ?2",
                params![key.kind.name(), key.id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(secondary_err)?;

        match row {
            Some((schema_version, payload)) => Ok(Some(EntityPayload::new(
                schema_version as u32,
                serde_json::from_str(&payload)?,
            ))),
            None => Ok(None),
        }
    }

    fn list_ids(&self, kind: EntityKind) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT id FROM entities WHERE kind = ?1 ORDER BY id")
            .map_err(secondary_err)?;
        let ids = stmt
            .query_map([kind.name()], |row| row.get(0))
            .map_err(secondary_err)?
            .collect::<std::result::Result<Vec<String>, _>>()
            .map_err(secondary_err)?;
        Ok(ids)
    }
}
