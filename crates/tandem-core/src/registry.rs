//! Kind-name resolution for decoding replicated payloads.
//!
//! The registry is built once from the closed [`EntityKind`] set. Every wire
//! kind name resolves to a descriptor carrying the highest schema version
//! this build understands and a decode check for its payloads.

use crate::error::{Result, TandemError};
use crate::types::{EntityKind, EntityPayload};
use std::collections::HashMap;

/// Validates a payload for one kind.
pub type DecodeFn = fn(&KindDescriptor, &EntityPayload) -> Result<()>;

#[derive(Debug, Clone)]
pub struct KindDescriptor {
    pub kind: EntityKind,
    pub max_schema_version: u32,
    pub decode: DecodeFn,
}

impl KindDescriptor {
    pub fn new(kind: EntityKind, max_schema_version: u32) -> Self {
        Self {
            kind,
            max_schema_version,
            decode: decode_document,
        }
    }
}

/// Accepts any JSON object written with a known schema version.
fn decode_document(descriptor: &KindDescriptor, payload: &EntityPayload) -> Result<()> {
    if payload.schema_version == 0 || payload.schema_version > descriptor.max_schema_version {
        return Err(TandemError::Deserialization(format!(
            "{} payload has schema version {}, supported 1..={}",
            descriptor.kind, payload.schema_version, descriptor.max_schema_version
        )));
    }
    if !payload.data.is_object() {
        return Err(TandemError::Deserialization(format!(
            "{} payload is not a document",
            descriptor.kind
        )));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct KindRegistry {
    by_name: HashMap<&'static str, KindDescriptor>,
}

impl KindRegistry {
    /// Registry over every [`EntityKind`] at schema version 1.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        for kind in EntityKind::ALL {
            registry.register(KindDescriptor::new(kind, 1));
        }
        registry
    }

    pub fn empty() -> Self {
        Self {
            by_name: HashMap::new(),
        }
    }

    /// Add or replace the descriptor for a kind.
    pub fn register(&mut self, descriptor: KindDescriptor) {
        self.by_name.insert(descriptor.kind.name(), descriptor);
    }

    pub fn resolve(&self, name: &str) -> Result<&KindDescriptor> {
        self.by_name
            .get(name)
            .ok_or_else(|| TandemError::UnknownKind(name.to_string()))
    }

    /// Resolve `name` and validate `payload` against it.
    pub fn decode(&self, name: &str, payload: &EntityPayload) -> Result<EntityKind> {
        let descriptor = self.resolve(name)?;
        (descriptor.decode)(descriptor, payload)?;
        Ok(descriptor.kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = &KindDescriptor> {
        self.by_name.values()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

impl Default for KindRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
