//! Blob store backends for diff files.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tandem_core::{
    error::{Result, TandemError},
    traits::{BlobMetadata, BlobStore},
};
use uuid::Uuid;

const METADATA_SUFFIX: &str = ".json";
const TEMP_SUFFIX: &str = ".tmp";

/// Local filesystem blob store
///
/// Each blob is a file in `base_path`; its metadata lives in a `<name>.json`
/// sidecar written before the blob itself becomes visible. The writer that
/// creates the sidecar is the only one allowed to publish the blob.
pub struct LocalBlobStore {
    base_path: PathBuf,
}

impl LocalBlobStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn blob_path(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(TandemError::InvalidArgument(format!(
                "invalid blob name: {name:?}"
            )));
        }
        Ok(self.base_path.join(name))
    }

    fn metadata_path(&self, name: &str) -> Result<PathBuf> {
        self.blob_path(&format!("{name}{METADATA_SUFFIX}"))
    }

    /// Staging path private to one write call.
    fn temp_path(&self, target: &str) -> Result<PathBuf> {
        self.blob_path(&format!("{target}.{}{TEMP_SUFFIX}", Uuid::new_v4().simple()))
    }
}

/// Hard-link `tmp` to `target` and drop `tmp`. Linking fails when the target
/// exists, so at most one caller gets `true` per target.
async fn publish_once(tmp: &Path, target: &Path) -> Result<bool> {
    let linked = tokio::fs::hard_link(tmp, target).await;
    let removed = tokio::fs::remove_file(tmp).await;
    let published = match linked {
        Ok(()) => true,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => false,
        Err(e) => return Err(e.into()),
    };
    removed?;
    Ok(published)
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.base_path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.starts_with(prefix)
                && !name.ends_with(METADATA_SUFFIX)
                && !name.ends_with(TEMP_SUFFIX)
            {
                names.push(name);
            }
        }
        Ok(names)
    }

    async fn read(&self, name: &str) -> Result<Vec<u8>> {
        match tokio::fs::read(self.blob_path(name)?).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(TandemError::NotFound(format!("Blob not found: {name}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn metadata(&self, name: &str) -> Result<BlobMetadata> {
        let json = match tokio::fs::read_to_string(self.metadata_path(name)?).await {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(TandemError::NotFound(format!(
                    "Blob metadata not found: {name}"
                )))
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&json).map_err(|e| TandemError::Blob(format!("{name}: {e}")))
    }

    async fn write(&self, name: &str, bytes: Vec<u8>, metadata: BlobMetadata) -> Result<bool> {
        let path = self.blob_path(name)?;
        let metadata_path = self.metadata_path(name)?;
        if tokio::fs::try_exists(&path).await? {
            return Ok(false);
        }
        tokio::fs::create_dir_all(&self.base_path).await?;

        let metadata_json = serde_json::to_string_pretty(&metadata)
            .map_err(|e| TandemError::Serialization(e.to_string()))?;
        let metadata_tmp = self.temp_path(&format!("{name}{METADATA_SUFFIX}"))?;
        tokio::fs::write(&metadata_tmp, metadata_json).await?;

        // Whoever links the sidecar first owns the name.
        let claimed = publish_once(&metadata_tmp, &metadata_path).await?;
        if !claimed {
            return Ok(false);
        }

        let data_tmp = self.temp_path(name)?;
        tokio::fs::write(&data_tmp, &bytes).await?;
        publish_once(&data_tmp, &path).await
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.blob_path(name)?).await?)
    }
}

/// In-process blob store
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<BTreeMap<String, (Vec<u8>, BlobMetadata)>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop a blob, e.g. to simulate a lost diff file.
    pub fn remove(&self, name: &str) -> bool {
        self.blobs.lock().remove(name).is_some()
    }

    pub fn names(&self) -> Vec<String> {
        self.blobs.lock().keys().cloned().collect()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .blobs
            .lock()
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn read(&self, name: &str) -> Result<Vec<u8>> {
        self.blobs
            .lock()
            .get(name)
            .map(|(bytes, _)| bytes.clone())
            .ok_or_else(|| TandemError::NotFound(format!("Blob not found: {name}")))
    }

    async fn metadata(&self, name: &str) -> Result<BlobMetadata> {
        self.blobs
            .lock()
            .get(name)
            .map(|(_, metadata)| metadata.clone())
            .ok_or_else(|| TandemError::NotFound(format!("Blob not found: {name}")))
    }

    async fn write(&self, name: &str, bytes: Vec<u8>, metadata: BlobMetadata) -> Result<bool> {
        let mut blobs = self.blobs.lock();
        if blobs.contains_key(name) {
            return Ok(false);
        }
        blobs.insert(name.to_string(), (bytes, metadata));
        Ok(true)
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.blobs.lock().contains_key(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn meta(value: &str) -> BlobMetadata {
        BlobMetadata::from([("k".to_string(), value.to_string())])
    }

    #[tokio::test]
    async fn local_store_is_write_once() {
        let dir = TempDir::new().unwrap();
        let store = LocalBlobStore::new(dir.path().join("diffs"));

        assert!(store.list("commit_").await.unwrap().is_empty());
        assert!(store.write("commit_a", b"one".to_vec(), meta("1")).await.unwrap());
        assert!(!store.write("commit_a", b"two".to_vec(), meta("2")).await.unwrap());

        assert_eq!(store.read("commit_a").await.unwrap(), b"one");
        assert_eq!(store.metadata("commit_a").await.unwrap(), meta("1"));
        assert_eq!(store.list("commit_").await.unwrap(), vec!["commit_a"]);
        assert!(store.exists("commit_a").await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_writers_keep_data_and_metadata_together() {
        let dir = TempDir::new().unwrap();
        let store = LocalBlobStore::new(dir.path());

        for round in 0..20 {
            let name = format!("commit_{round}");
            let (first, second) = tokio::join!(
                store.write(&name, b"one".to_vec(), meta("1")),
                store.write(&name, b"two".to_vec(), meta("2")),
            );
            let (first, second) = (first.unwrap(), second.unwrap());
            assert!(first ^ second, "exactly one writer wins");

            let data = store.read(&name).await.unwrap();
            let metadata = store.metadata(&name).await.unwrap();
            if first {
                assert_eq!((data, metadata), (b"one".to_vec(), meta("1")));
            } else {
                assert_eq!((data, metadata), (b"two".to_vec(), meta("2")));
            }
        }

        let mut leftovers = tokio::fs::read_dir(dir.path()).await.unwrap();
        while let Some(entry) = leftovers.next_entry().await.unwrap() {
            let file = entry.file_name().to_string_lossy().into_owned();
            assert!(!file.ends_with(TEMP_SUFFIX), "stray temp file {file}");
        }
    }

    #[tokio::test]
    async fn losing_writer_leaves_metadata_untouched() {
        let dir = TempDir::new().unwrap();
        let store = LocalBlobStore::new(dir.path());
        assert!(store.write("commit_a", b"one".to_vec(), meta("1")).await.unwrap());

        // Sidecar present but the blob not yet linked: a second writer must
        // back off without replacing the sidecar.
        tokio::fs::remove_file(dir.path().join("commit_a")).await.unwrap();
        assert!(!store.write("commit_a", b"two".to_vec(), meta("2")).await.unwrap());
        assert_eq!(store.metadata("commit_a").await.unwrap(), meta("1"));
        assert!(!store.exists("commit_a").await.unwrap());
    }

    #[tokio::test]
    async fn local_store_reports_missing_blobs() {
        let dir = TempDir::new().unwrap();
        let store = LocalBlobStore::new(dir.path());
        assert!(matches!(
            store.read("nope").await,
            Err(TandemError::NotFound(_))
        ));
        assert!(!store.exists("nope").await.unwrap());
        assert!(store.read("../escape").await.is_err());
    }

    #[tokio::test]
    async fn memory_store_filters_by_prefix() {
        let store = MemoryBlobStore::new();
        store.write("a1", vec![1], meta("x")).await.unwrap();
        store.write("b1", vec![2], meta("y")).await.unwrap();
        assert_eq!(store.list("a").await.unwrap(), vec!["a1"]);
        assert!(!store.write("a1", vec![9], meta("z")).await.unwrap());
        assert_eq!(store.read("a1").await.unwrap(), vec![1]);
    }
}
