//! Whole-file remote synchronization.
//!
//! A [`SyncBackend`] moves the entire database as one blob. Each push also
//! writes a sidecar `{"lastSync": <epoch ms>}` next to the blob, at the same
//! path with its extension replaced by `.meta.json`. There is no merge and no
//! conflict detection: the last writer wins.

mod local;
mod webdav;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::SyncConfig;
use crate::error::Result;
use crate::types::now_millis;

pub use local::DirectorySync;
pub use webdav::WebDavSync;

/// Remote storage for the database blob.
#[async_trait]
pub trait SyncBackend: Send + Sync {
    /// Prepare the remote location (create parent collections/directories).
    async fn init(&self) -> Result<()>;

    /// Upload the blob, then refresh the sidecar timestamp.
    async fn push(&self, data: &[u8]) -> Result<()>;

    /// Download the blob. `None` when the remote has no copy.
    async fn pull(&self) -> Result<Option<Vec<u8>>>;

    /// Time of the last push, from the sidecar. `None` if absent or unreadable.
    async fn last_sync_time(&self) -> Option<i64>;
}

/// Contents of the sidecar written after each push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMeta {
    pub last_sync: i64,
}

impl SyncMeta {
    pub fn now() -> Self {
        Self {
            last_sync: now_millis(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Sidecar path for a blob path: `/sync/data.db` -> `/sync/data.meta.json`.
///
/// A file name without an extension gets `.meta.json` appended.
pub fn meta_path(remote_path: &str) -> String {
    let name_start = remote_path.rfind('/').map_or(0, |i| i + 1);
    match remote_path[name_start..].rfind('.') {
        Some(dot) if dot > 0 => format!("{}.meta.json", &remote_path[..name_start + dot]),
        _ => format!("{}.meta.json", remote_path),
    }
}

/// Build the backend named by the configuration.
pub fn backend_from_config(config: &SyncConfig) -> Result<Box<dyn SyncBackend>> {
    match config {
        SyncConfig::Webdav(webdav) => Ok(Box::new(WebDavSync::new(webdav.clone())?)),
        SyncConfig::Directory(dir) => Ok(Box::new(DirectorySync::new(
            dir.root.clone(),
            dir.remote_path.clone(),
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DirectorySyncConfig, WebDavConfig};

    #[test]
    fn test_meta_path() {
        assert_eq!(meta_path("/memory-sync/data.db"), "/memory-sync/data.meta.json");
        assert_eq!(meta_path("data.sqlite3"), "data.meta.json");
        assert_eq!(meta_path("/a.b/data"), "/a.b/data.meta.json");
        assert_eq!(meta_path("/sync/.hidden"), "/sync/.hidden.meta.json");
    }

    #[test]
    fn test_sync_meta_wire_format() {
        let meta = SyncMeta { last_sync: 1_700_000_000_000 };
        let bytes = meta.to_bytes().unwrap();
        assert_eq!(bytes, br#"{"lastSync":1700000000000}"#.to_vec());
        assert_eq!(SyncMeta::from_bytes(&bytes).unwrap(), meta);
        assert!(SyncMeta::from_bytes(b"{}").is_err());
    }

    #[test]
    fn test_backend_from_config() {
        let dir = tempfile::tempdir().unwrap();
        assert!(backend_from_config(&SyncConfig::Directory(DirectorySyncConfig::new(
            dir.path()
        )))
        .is_ok());
        assert!(backend_from_config(&SyncConfig::Webdav(WebDavConfig::new(
            "http://localhost:1",
            "me",
            "secret"
        )))
        .is_ok());
    }
}
