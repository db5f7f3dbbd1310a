use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;

use crate::StoreError;

/// Content-addressed-by-path blob store. Used to off-load oversized
/// `activityData` and full `EnrichedActivityEvent` payloads per spec section
/// 6's two normative prefixes (`activities/...`, `enriched_events/...`).
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<(), StoreError>;
    async fn get(&self, path: &str) -> Result<Vec<u8>, StoreError>;
}

pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&full, bytes).await?;
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        let full = self.resolve(path);
        fs::read(&full)
            .await
            .map_err(|err| match err.kind() {
                std::io::ErrorKind::NotFound => StoreError::NotFound(path.to_string()),
                _ => StoreError::Io(err),
            })
    }
}

pub fn activity_data_path(user_id: &str, pipeline_execution_id: &str) -> String {
    format!("activities/{}/{}.json", user_id, pipeline_execution_id)
}

pub fn enriched_event_path(user_id: &str, pipeline_execution_id: &str) -> String {
    format!("enriched_events/{}/{}.json", user_id, pipeline_execution_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_bytes_through_the_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let path = activity_data_path("u1", "pe1");
        store.put(&path, b"hello".to_vec()).await.unwrap();
        let read_back = store.get(&path).await.unwrap();
        assert_eq!(read_back, b"hello");
    }

    #[tokio::test]
    async fn missing_blob_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let err = store.get("activities/u1/missing.json").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
