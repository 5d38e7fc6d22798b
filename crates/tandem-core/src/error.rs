use chrono::{DateTime, Utc};
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TandemError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Unknown entity kind: {0}")]
    UnknownKind(String),

    /// A diff file is missing between two checkpoints; replay cannot proceed
    /// until an operator restores it.
    #[error(
        "Missing diff file before {file}: expected lower bound {expected_lower}, found {found_lower}"
    )]
    MissingDiffFile {
        expected_lower: DateTime<Utc>,
        found_lower: DateTime<Utc>,
        file: String,
    },

    #[error("Secondary store error: {0}")]
    Secondary(String),

    #[error("Lock store error: {0}")]
    LockStore(String),

    #[error("Blob store error: {0}")]
    Blob(String),

    #[error("Checkpoint store error: {0}")]
    CheckpointStore(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, TandemError>;

impl From<serde_json::Error> for TandemError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            TandemError::Deserialization(err.to_string())
        } else {
            TandemError::Serialization(err.to_string())
        }
    }
}
