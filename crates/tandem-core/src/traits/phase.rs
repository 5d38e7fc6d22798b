use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stage of the migration from the primary store to the secondary store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationPhase {
    DatastoreOnly,
    DatastorePrimary,
    DatastorePrimaryNoAsync,
    DatastorePrimaryReadOnly,
    SqlPrimaryReadOnly,
    SqlPrimary,
    SqlOnly,
}

impl MigrationPhase {
    /// Whether commit logs are replayed into the secondary store in this phase.
    pub fn replicates_to_secondary(self) -> bool {
        matches!(
            self,
            MigrationPhase::DatastorePrimary
                | MigrationPhase::DatastorePrimaryNoAsync
                | MigrationPhase::DatastorePrimaryReadOnly
        )
    }

    /// Phases reachable from this one in a single step.
    pub fn allowed_next(self) -> &'static [MigrationPhase] {
        use MigrationPhase::*;
        match self {
            DatastoreOnly => &[DatastorePrimary],
            DatastorePrimary => &[DatastoreOnly, DatastorePrimaryNoAsync],
            DatastorePrimaryNoAsync => &[DatastorePrimary, DatastorePrimaryReadOnly],
            DatastorePrimaryReadOnly => &[DatastorePrimary, SqlPrimaryReadOnly],
            SqlPrimaryReadOnly => &[DatastorePrimaryReadOnly, SqlPrimary],
            SqlPrimary => &[SqlPrimaryReadOnly, SqlOnly],
            SqlOnly => &[SqlPrimary],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MigrationPhase::DatastoreOnly => "DATASTORE_ONLY",
            MigrationPhase::DatastorePrimary => "DATASTORE_PRIMARY",
            MigrationPhase::DatastorePrimaryNoAsync => "DATASTORE_PRIMARY_NO_ASYNC",
            MigrationPhase::DatastorePrimaryReadOnly => "DATASTORE_PRIMARY_READ_ONLY",
            MigrationPhase::SqlPrimaryReadOnly => "SQL_PRIMARY_READ_ONLY",
            MigrationPhase::SqlPrimary => "SQL_PRIMARY",
            MigrationPhase::SqlOnly => "SQL_ONLY",
        }
    }
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Externally managed source of the current migration phase.
pub trait MigrationPhaseSource: Send + Sync {
    fn phase_at(&self, time: DateTime<Utc>) -> MigrationPhase;
}
