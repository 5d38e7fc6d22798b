use super::{BucketId, EntityKind};
use crate::error::{Result, TandemError};
use crate::registry::KindRegistry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Version of the transaction wire document.
pub const TRANSACTION_FORMAT_VERSION: u16 = 1;

/// Identity of one row: kind plus the kind-local id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub id: String,
}

impl EntityKey {
    pub fn new(kind: EntityKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind, self.id)
    }
}

/// Self-describing entity body: the schema version it was written with and
/// the document itself.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityPayload {
    pub schema_version: u32,
    pub data: serde_json::Value,
}

impl EntityPayload {
    pub fn new(schema_version: u32, data: serde_json::Value) -> Self {
        Self {
            schema_version,
            data,
        }
    }

    /// Version-1 payload.
    pub fn v1(data: serde_json::Value) -> Self {
        Self::new(1, data)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub key: EntityKey,
    pub payload: EntityPayload,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Mutation(Mutation),
    Deletion(EntityKey),
}

impl Operation {
    pub fn key(&self) -> &EntityKey {
        match self {
            Operation::Mutation(m) => &m.key,
            Operation::Deletion(key) => key,
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.key().kind
    }

    pub fn is_deletion(&self) -> bool {
        matches!(self, Operation::Deletion(_))
    }
}

/// All writes of one atomic commit on the primary store, in source order.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub commit_time: DateTime<Utc>,
    pub bucket: BucketId,
    pub operations: Vec<Operation>,
}

impl Transaction {
    pub fn new(commit_time: DateTime<Utc>, bucket: BucketId) -> Self {
        Self {
            commit_time,
            bucket,
            operations: Vec::new(),
        }
    }

    pub fn add_update(
        mut self,
        kind: EntityKind,
        id: impl Into<String>,
        payload: EntityPayload,
    ) -> Self {
        self.operations.push(Operation::Mutation(Mutation {
            key: EntityKey::new(kind, id),
            payload,
        }));
        self
    }

    pub fn add_delete(mut self, kind: EntityKind, id: impl Into<String>) -> Self {
        self.operations
            .push(Operation::Deletion(EntityKey::new(kind, id)));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn mutations(&self) -> impl Iterator<Item = &Mutation> {
        self.operations.iter().filter_map(|op| match op {
            Operation::Mutation(m) => Some(m),
            Operation::Deletion(_) => None,
        })
    }

    pub fn deletions(&self) -> impl Iterator<Item = &EntityKey> {
        self.operations.iter().filter_map(|op| match op {
            Operation::Deletion(key) => Some(key),
            Operation::Mutation(_) => None,
        })
    }

    /// Encode as a versioned JSON document.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let wire = WireTransaction {
            version: TRANSACTION_FORMAT_VERSION,
            commit_time: self.commit_time,
            bucket: self.bucket,
            ops: self
                .operations
                .iter()
                .map(|op| match op {
                    Operation::Mutation(m) => WireOp::Put {
                        kind: m.key.kind.name().to_string(),
                        id: m.key.id.clone(),
                        schema_version: m.payload.schema_version,
                        payload: m.payload.data.clone(),
                    },
                    Operation::Deletion(key) => WireOp::Delete {
                        kind: key.kind.name().to_string(),
                        id: key.id.clone(),
                    },
                })
                .collect(),
        };
        serde_json::to_vec(&wire).map_err(|e| TandemError::Serialization(e.to_string()))
    }

    /// Decode a document written by [`Transaction::to_bytes`], resolving
    /// every kind name and payload through `registry`.
    pub fn from_bytes(bytes: &[u8], registry: &KindRegistry) -> Result<Self> {
        let wire: WireTransaction = serde_json::from_slice(bytes)
            .map_err(|e| TandemError::Deserialization(format!("transaction: {e}")))?;
        if wire.version != TRANSACTION_FORMAT_VERSION {
            return Err(TandemError::Deserialization(format!(
                "unsupported transaction format version {}",
                wire.version
            )));
        }

        let mut operations = Vec::with_capacity(wire.ops.len());
        for op in wire.ops {
            match op {
                WireOp::Put {
                    kind,
                    id,
                    schema_version,
                    payload,
                } => {
                    let payload = EntityPayload::new(schema_version, payload);
                    let kind = registry.decode(&kind, &payload)?;
                    operations.push(Operation::Mutation(Mutation {
                        key: EntityKey::new(kind, id),
                        payload,
                    }));
                }
                WireOp::Delete { kind, id } => {
                    let kind = registry.resolve(&kind)?.kind;
                    operations.push(Operation::Deletion(EntityKey::new(kind, id)));
                }
            }
        }

        Ok(Self {
            commit_time: wire.commit_time,
            bucket: wire.bucket,
            operations,
        })
    }
}

#[derive(Serialize, Deserialize)]
struct WireTransaction {
    version: u16,
    commit_time: DateTime<Utc>,
    bucket: BucketId,
    ops: Vec<WireOp>,
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum WireOp {
    Put {
        kind: String,
        id: String,
        schema_version: u32,
        payload: serde_json::Value,
    },
    Delete {
        kind: String,
        id: String,
    },
}
