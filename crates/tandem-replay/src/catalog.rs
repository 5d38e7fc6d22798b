use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use tandem_core::{
    diff::{parse_time, DiffFileName, DIFF_FILE_PREFIX, LOWER_BOUND_CHECKPOINT},
    error::{Result, TandemError},
    traits::BlobStore,
};
use tracing::{debug, warn};

/// One diff file as seen from its name and metadata, before reading it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffDescriptor {
    pub name: DiffFileName,
    pub lower: DateTime<Utc>,
}

impl DiffDescriptor {
    pub fn upper(&self) -> DateTime<Utc> {
        self.name.upper()
    }
}

/// Lists diff files between two checkpoint times and checks they chain.
#[derive(Clone)]
pub struct DiffCatalog {
    blobs: Arc<dyn BlobStore>,
    concurrency: usize,
}

impl DiffCatalog {
    pub fn new(blobs: Arc<dyn BlobStore>, concurrency: usize) -> Self {
        Self {
            blobs,
            concurrency: concurrency.max(1),
        }
    }

    /// Diff files whose upper time lies in `(start, end]`, ascending.
    ///
    /// The first file must start at `start` and every file must start where
    /// the previous one ended; otherwise a file is missing and the listing
    /// fails with [`TandemError::MissingDiffFile`].
    pub async fn list(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DiffDescriptor>> {
        let names = self.blobs.list(DIFF_FILE_PREFIX).await?;
        let candidates: Vec<DiffFileName> = names
            .iter()
            .filter_map(|name| match DiffFileName::parse(name) {
                Ok(parsed) => Some(parsed),
                Err(e) => {
                    warn!(name = %name, error = %e, "Ignoring unparsable diff file name");
                    None
                }
            })
            .filter(|name| name.upper() > start && name.upper() <= end)
            .collect();

        let mut files: Vec<DiffDescriptor> = stream::iter(candidates)
            .map(|name| async move { self.describe(name).await })
            .buffer_unordered(self.concurrency)
            .try_collect()
            .await?;
        files.sort_by_key(|f| f.upper());

        verify_chain(start, &files)?;
        debug!(%start, %end, count = files.len(), "Listed diff files");
        Ok(files)
    }

    async fn describe(&self, name: DiffFileName) -> Result<DiffDescriptor> {
        let blob = name.to_string();
        let metadata = self.blobs.metadata(&blob).await?;
        let lower = metadata.get(LOWER_BOUND_CHECKPOINT).ok_or_else(|| {
            TandemError::Deserialization(format!("{blob} has no {LOWER_BOUND_CHECKPOINT}"))
        })?;
        Ok(DiffDescriptor {
            name,
            lower: parse_time(lower)?,
        })
    }
}

fn verify_chain(start: DateTime<Utc>, files: &[DiffDescriptor]) -> Result<()> {
    let mut expected = start;
    for file in files {
        if file.lower != expected {
            return Err(TandemError::MissingDiffFile {
                expected_lower: expected,
                found_lower: file.lower,
                file: file.name.to_string(),
            });
        }
        expected = file.upper();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use parking_lot::Mutex;
    use std::collections::BTreeMap;
    use tandem_core::{diff::format_time, start_of_time, traits::BlobMetadata};

    #[derive(Default)]
    struct Blobs {
        metadata: Mutex<BTreeMap<String, BlobMetadata>>,
    }

    impl Blobs {
        fn add_diff(&self, lower: i64, upper: i64) {
            let meta = BlobMetadata::from([(
                LOWER_BOUND_CHECKPOINT.to_string(),
                format_time(at(lower)),
            )]);
            self.metadata
                .lock()
                .insert(DiffFileName::for_checkpoint(at(upper)).to_string(), meta);
        }
    }

    #[async_trait]
    impl BlobStore for Blobs {
        async fn list(&self, prefix: &str) -> Result<Vec<String>> {
            // Reverse order so the catalog has to sort.
            Ok(self
                .metadata
                .lock()
                .keys()
                .rev()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect())
        }

        async fn read(&self, name: &str) -> Result<Vec<u8>> {
            Err(TandemError::NotFound(name.to_string()))
        }

        async fn metadata(&self, name: &str) -> Result<BlobMetadata> {
            self.metadata
                .lock()
                .get(name)
                .cloned()
                .ok_or_else(|| TandemError::NotFound(name.to_string()))
        }

        async fn write(&self, _: &str, _: Vec<u8>, _: BlobMetadata) -> Result<bool> {
            Ok(false)
        }

        async fn exists(&self, name: &str) -> Result<bool> {
            Ok(self.metadata.lock().contains_key(name))
        }
    }

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    fn catalog(blobs: Blobs) -> DiffCatalog {
        DiffCatalog::new(Arc::new(blobs), 3)
    }

    #[tokio::test]
    async fn lists_window_in_order() {
        let blobs = Blobs::default();
        blobs.add_diff(0, 100);
        blobs.add_diff(100, 200);
        blobs.add_diff(200, 300);
        blobs.add_diff(300, 400);
        let catalog = catalog(blobs);

        let files = catalog.list(at(100), at(300)).await.unwrap();
        let uppers: Vec<_> = files.iter().map(|f| f.upper()).collect();
        assert_eq!(uppers, vec![at(200), at(300)]);

        let all = catalog.list(start_of_time(), at(1_000)).await.unwrap();
        assert_eq!(all.len(), 4);
        assert!(catalog.list(at(400), at(1_000)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn gap_between_files_is_fatal() {
        let blobs = Blobs::default();
        blobs.add_diff(0, 100);
        blobs.add_diff(150, 200);
        let err = catalog(blobs).list(at(0), at(500)).await.unwrap_err();
        match err {
            TandemError::MissingDiffFile {
                expected_lower,
                found_lower,
                ..
            } => {
                assert_eq!(expected_lower, at(100));
                assert_eq!(found_lower, at(150));
            }
            other => panic!("expected MissingDiffFile, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn first_file_must_start_at_window_start() {
        let blobs = Blobs::default();
        blobs.add_diff(0, 100);
        blobs.add_diff(100, 200);
        // Cursor between two file boundaries.
        let err = catalog(blobs).list(at(50), at(500)).await.unwrap_err();
        assert!(matches!(err, TandemError::MissingDiffFile { .. }));
    }

    #[tokio::test]
    async fn non_canonical_names_are_ignored() {
        let blobs = Blobs::default();
        blobs.add_diff(0, 500);
        blobs.add_diff(500, 1_000);
        // Same instant as the second file, different spelling.
        blobs.metadata.lock().insert(
            "commit_diff_until_1970-01-01T00:00:00.5Z".to_string(),
            BlobMetadata::from([(LOWER_BOUND_CHECKPOINT.to_string(), format_time(at(0)))]),
        );

        let files = catalog(blobs).list(at(0), at(2_000)).await.unwrap();
        let uppers: Vec<_> = files.iter().map(|f| f.upper()).collect();
        assert_eq!(uppers, vec![at(500), at(1_000)]);
    }

    #[tokio::test]
    async fn missing_lower_bound_metadata_is_an_error() {
        let blobs = Blobs::default();
        blobs
            .metadata
            .lock()
            .insert(DiffFileName::for_checkpoint(at(100)).to_string(), BlobMetadata::new());
        assert!(catalog(blobs).list(at(0), at(500)).await.is_err());
    }
}
