//! SQLite-backed secondary store
//!
//! Holds the replicated entity rows, the replication cursor and the lock
//! table in one database file.
//!
//! Key features:
//! - Cursor committed in the same transaction as the rows it covers
//! - `BEGIN IMMEDIATE` write transactions, rolled back on drop
//! - Compare-and-set lock rows for the replay lease
//! - WAL mode for better concurrency

pub mod lock;
pub mod schema;
pub mod store;
pub mod txn;

pub use lock::SqliteLockStore;
pub use store::SqliteSecondaryStore;
pub use txn::SqliteReplayTxn;

use tandem_core::TandemError;

pub(crate) fn secondary_err(e: rusqlite::Error) -> TandemError {
    TandemError::Secondary(e.to_string())
}
