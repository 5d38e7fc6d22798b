use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// String metadata stored with a blob.
pub type BlobMetadata = BTreeMap<String, String>;

/// Durable object storage for diff files.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Names starting with `prefix`, in no particular order.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    async fn read(&self, name: &str) -> Result<Vec<u8>>;

    async fn metadata(&self, name: &str) -> Result<BlobMetadata>;

    /// Write a new blob. Blobs are write-once: returns `false` and leaves the
    /// existing blob untouched if `name` already exists.
    async fn write(&self, name: &str, bytes: Vec<u8>, metadata: BlobMetadata) -> Result<bool>;

    async fn exists(&self, name: &str) -> Result<bool>;
}
