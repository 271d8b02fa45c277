//! Sync to a local directory (a mounted share or a folder synced by other means).

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::sync::{meta_path, SyncBackend, SyncMeta};

/// Treats `root` as the remote; the blob lives at `root/remote_path`.
#[derive(Debug, Clone)]
pub struct DirectorySync {
    blob: PathBuf,
    meta: PathBuf,
}

impl DirectorySync {
    pub fn new(root: impl Into<PathBuf>, remote_path: impl AsRef<str>) -> Self {
        let root = root.into();
        let remote_path = remote_path.as_ref();
        Self {
            blob: root.join(remote_path.trim_start_matches('/')),
            meta: root.join(meta_path(remote_path).trim_start_matches('/')),
        }
    }

    /// Local path of the synced blob.
    pub fn blob_path(&self) -> &Path {
        &self.blob
    }

    async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await?;
        }
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        fs::write(&tmp, data).await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl SyncBackend for DirectorySync {
    async fn init(&self) -> Result<()> {
        if let Some(dir) = self.blob.parent() {
            fs::create_dir_all(dir)
                .await
                .map_err(|e| Error::sync(format!("cannot create {}: {}", dir.display(), e)))?;
        }
        Ok(())
    }

    async fn push(&self, data: &[u8]) -> Result<()> {
        Self::write_atomic(&self.blob, data)
            .await
            .map_err(|e| Error::sync(format!("write {} failed: {}", self.blob.display(), e)))?;
        Self::write_atomic(&self.meta, &SyncMeta::now().to_bytes()?)
            .await
            .map_err(|e| Error::sync(format!("write {} failed: {}", self.meta.display(), e)))?;
        debug!(path = %self.blob.display(), bytes = data.len(), "pushed blob");
        Ok(())
    }

    async fn pull(&self) -> Result<Option<Vec<u8>>> {
        match fs::read(&self.blob).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::sync(format!(
                "read {} failed: {}",
                self.blob.display(),
                e
            ))),
        }
    }

    async fn last_sync_time(&self) -> Option<i64> {
        let bytes = match fs::read(&self.meta).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.meta.display(), error = %e, "failed to read sync sidecar");
                return None;
            }
        };
        match SyncMeta::from_bytes(&bytes) {
            Ok(meta) => Some(meta.last_sync),
            Err(e) => {
                warn!(path = %self.meta.display(), error = %e, "unreadable sync sidecar");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        let sync = DirectorySync::new("/mnt/share", "/memory-sync/data.db");
        assert_eq!(sync.blob_path(), Path::new("/mnt/share/memory-sync/data.db"));
        assert_eq!(sync.meta, PathBuf::from("/mnt/share/memory-sync/data.meta.json"));
    }

    #[tokio::test]
    async fn test_push_pull_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let sync = DirectorySync::new(dir.path(), "/memory-sync/data.db");
        sync.init().await.unwrap();

        assert_eq!(sync.pull().await.unwrap(), None);
        assert_eq!(sync.last_sync_time().await, None);

        sync.push(b"first").await.unwrap();
        sync.push(b"second").await.unwrap();

        assert_eq!(sync.pull().await.unwrap(), Some(b"second".to_vec()));
        assert!(sync.last_sync_time().await.unwrap() > 0);
    }

    #[tokio::test]
    async fn test_push_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let sync = DirectorySync::new(dir.path(), "a/b/data.db");

        sync.push(b"blob").await.unwrap();
        assert!(dir.path().join("a/b/data.db").is_file());
        assert!(dir.path().join("a/b/data.meta.json").is_file());
    }

    #[tokio::test]
    async fn test_corrupt_sidecar_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let sync = DirectorySync::new(dir.path(), "data.db");
        sync.push(b"blob").await.unwrap();
        std::fs::write(dir.path().join("data.meta.json"), "garbage").unwrap();

        assert_eq!(sync.last_sync_time().await, None);
    }
}
