//! WebDAV sync backend.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use tracing::{debug, warn};

use crate::config::WebDavConfig;
use crate::error::{Error, Result};
use crate::sync::{meta_path, SyncBackend, SyncMeta};

/// Pushes and pulls the database blob over WebDAV with basic auth.
pub struct WebDavSync {
    config: WebDavConfig,
    http: Client,
    meta_path: String,
}

impl WebDavSync {
    pub fn new(config: WebDavConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;
        let meta_path = meta_path(&config.remote_path);

        Ok(Self {
            config,
            http,
            meta_path,
        })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, self.url(path))
            .basic_auth(&self.config.username, Some(&self.config.password))
    }

    async fn put(&self, path: &str, body: Vec<u8>) -> Result<()> {
        let response = self
            .request(Method::PUT, path)
            .body(body)
            .send()
            .await
            .map_err(|e| Error::sync(format!("PUT {} failed: {}", path, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::sync(format!("PUT {} returned {}", path, status)));
        }
        Ok(())
    }

    /// GET a resource; `None` on 404.
    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let response = self
            .request(Method::GET, path)
            .send()
            .await
            .map_err(|e| Error::sync(format!("GET {} failed: {}", path, e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(Error::sync(format!("GET {} returned {}", path, status)));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::sync(format!("Failed to read {}: {}", path, e)))?;
        Ok(Some(bytes.to_vec()))
    }
}

/// Parent collections of a remote path, outermost first.
fn parent_collections(remote_path: &str) -> Vec<&str> {
    let trimmed = remote_path.trim_end_matches('/');
    let Some(end) = trimmed.rfind('/') else {
        return Vec::new();
    };
    let dir = &trimmed[..end];

    dir.match_indices('/')
        .map(|(i, _)| i)
        .chain(std::iter::once(dir.len()))
        .filter(|&i| i > 0)
        .map(|i| &dir[..i])
        .collect()
}

#[async_trait]
impl SyncBackend for WebDavSync {
    async fn init(&self) -> Result<()> {
        let mkcol = Method::from_bytes(b"MKCOL")
            .map_err(|e| Error::Internal(format!("invalid method: {}", e)))?;

        for collection in parent_collections(&self.config.remote_path) {
            let response = self
                .request(mkcol.clone(), collection)
                .send()
                .await
                .map_err(|e| Error::sync(format!("MKCOL {} failed: {}", collection, e)))?;

            let status = response.status();
            // 405: the collection already exists
            if status.is_success() || status == StatusCode::METHOD_NOT_ALLOWED {
                debug!(collection, %status, "remote collection ready");
                continue;
            }
            return Err(Error::sync(format!("MKCOL {} returned {}", collection, status)));
        }
        Ok(())
    }

    async fn push(&self, data: &[u8]) -> Result<()> {
        self.put(&self.config.remote_path, data.to_vec()).await?;
        self.put(&self.meta_path, SyncMeta::now().to_bytes()?).await?;
        debug!(path = %self.config.remote_path, bytes = data.len(), "pushed blob");
        Ok(())
    }

    async fn pull(&self) -> Result<Option<Vec<u8>>> {
        self.get(&self.config.remote_path).await
    }

    async fn last_sync_time(&self) -> Option<i64> {
        match self.get(&self.meta_path).await {
            Ok(Some(bytes)) => match SyncMeta::from_bytes(&bytes) {
                Ok(meta) => Some(meta.last_sync),
                Err(e) => {
                    warn!(path = %self.meta_path, error = %e, "unreadable sync sidecar");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(path = %self.meta_path, error = %e, "failed to fetch sync sidecar");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    // base64("me:secret")
    const AUTH: &str = "Basic bWU6c2VjcmV0";

    fn backend(url: String) -> WebDavSync {
        WebDavSync::new(WebDavConfig::new(url, "me", "secret")).unwrap()
    }

    #[test]
    fn test_parent_collections() {
        assert_eq!(
            parent_collections("/memory-sync/data.db"),
            vec!["/memory-sync"]
        );
        assert_eq!(parent_collections("/a/b/c/data.db"), vec!["/a", "/a/b", "/a/b/c"]);
        assert!(parent_collections("/data.db").is_empty());
        assert!(parent_collections("data.db").is_empty());
        assert_eq!(parent_collections("a/b/data.db"), vec!["a", "a/b"]);
    }

    #[tokio::test]
    async fn test_init_creates_collections() {
        let mut server = mockito::Server::new_async().await;
        let created = server
            .mock("MKCOL", "/memory-sync")
            .match_header("authorization", AUTH)
            .with_status(201)
            .create_async()
            .await;

        backend(server.url()).init().await.unwrap();
        created.assert_async().await;
    }

    #[tokio::test]
    async fn test_init_tolerates_existing_collection() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("MKCOL", "/memory-sync")
            .with_status(405)
            .create_async()
            .await;

        assert!(backend(server.url()).init().await.is_ok());
    }

    #[tokio::test]
    async fn test_push_uploads_blob_then_sidecar() {
        let mut server = mockito::Server::new_async().await;
        let blob = server
            .mock("PUT", "/memory-sync/data.db")
            .match_header("authorization", AUTH)
            .match_body("sqlite-bytes")
            .with_status(201)
            .create_async()
            .await;
        let meta = server
            .mock("PUT", "/memory-sync/data.meta.json")
            .match_body(Matcher::Regex(r#"^\{"lastSync":\d+\}$"#.to_string()))
            .with_status(201)
            .create_async()
            .await;

        backend(server.url()).push(b"sqlite-bytes").await.unwrap();

        blob.assert_async().await;
        meta.assert_async().await;
    }

    #[tokio::test]
    async fn test_push_failure_is_sync_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("PUT", "/memory-sync/data.db")
            .with_status(401)
            .create_async()
            .await;

        let err = backend(server.url()).push(b"x").await.unwrap_err();
        assert!(matches!(err, Error::Sync(_)));
    }

    #[tokio::test]
    async fn test_pull() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/memory-sync/data.db")
            .with_status(200)
            .with_body("remote-bytes")
            .create_async()
            .await;

        let pulled = backend(server.url()).pull().await.unwrap();
        assert_eq!(pulled, Some(b"remote-bytes".to_vec()));
    }

    #[tokio::test]
    async fn test_pull_missing_is_none() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/memory-sync/data.db")
            .with_status(404)
            .create_async()
            .await;

        assert_eq!(backend(server.url()).pull().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_last_sync_time() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/memory-sync/data.meta.json")
            .with_status(200)
            .with_body(r#"{"lastSync":1700000000000}"#)
            .create_async()
            .await;

        assert_eq!(
            backend(server.url()).last_sync_time().await,
            Some(1_700_000_000_000)
        );
    }

    #[tokio::test]
    async fn test_last_sync_time_unreadable_is_none() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/memory-sync/data.meta.json")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        assert_eq!(backend(server.url()).last_sync_time().await, None);
    }

    #[test]
    fn test_url_joining() {
        let sync = backend("https://dav.example.com/remote.php/".to_string());
        assert_eq!(
            sync.url("/memory-sync/data.db"),
            "https://dav.example.com/remote.php/memory-sync/data.db"
        );
    }
}
