//! Configuration for the memory service.
//!
//! All sections have defaults, so a JSON config only needs the fields it
//! changes:
//!
//! ```json
//! {
//!   "db_path": "~/.local/share/memory/memory.db",
//!   "sync": { "type": "webdav", "url": "https://dav.example.com", "username": "me", "password": "secret" },
//!   "search": { "max_results": 10 }
//! }
//! ```

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const DEFAULT_REMOTE_PATH: &str = "/memory-sync/data.db";

/// Top-level memory service configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// SQLite database file; a leading `~` is expanded
    pub db_path: PathBuf,
    /// Remote whole-file sync target
    pub sync: Option<SyncConfig>,
    pub search: SearchConfig,
    pub import: ImportConfig,
    /// Upper bound on distinct keywords per entry
    pub max_keywords_per_entry: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./memory.db"),
            sync: None,
            search: SearchConfig::default(),
            import: ImportConfig::default(),
            max_keywords_per_entry: 64,
        }
    }
}

impl MemoryConfig {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Default::default()
        }
    }

    /// Load a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| Error::Config(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_sync(mut self, sync: SyncConfig) -> Self {
        self.sync = Some(sync);
        self
    }

    pub fn with_search(mut self, search: SearchConfig) -> Self {
        self.search = search;
        self
    }

    pub fn with_import(mut self, import: ImportConfig) -> Self {
        self.import = import;
        self
    }

    pub fn with_max_keywords(mut self, max: usize) -> Self {
        self.max_keywords_per_entry = max;
        self
    }

    /// The database path with `~` expanded.
    pub fn resolved_db_path(&self) -> PathBuf {
        match self.db_path.to_str() {
            Some(raw) => PathBuf::from(shellexpand::tilde(raw).into_owned()),
            None => self.db_path.clone(),
        }
    }

    /// Reject settings no component can work with.
    pub fn validate(&self) -> Result<()> {
        if self.max_keywords_per_entry == 0 {
            return Err(Error::Config(
                "max_keywords_per_entry must be positive".to_string(),
            ));
        }
        if !self.search.min_score.is_finite() || self.search.min_score < 0.0 {
            return Err(Error::Config(format!(
                "search.min_score must be a non-negative number, got {}",
                self.search.min_score
            )));
        }
        if self.search.candidate_limit == 0 {
            return Err(Error::Config(
                "search.candidate_limit must be positive".to_string(),
            ));
        }
        if self.import.extensions.is_empty() {
            return Err(Error::Config(
                "import.extensions must name at least one extension".to_string(),
            ));
        }
        if let Some(SyncConfig::Webdav(webdav)) = &self.sync {
            if webdav.url.trim().is_empty() {
                return Err(Error::Config("sync.url must not be empty".to_string()));
            }
        }
        Ok(())
    }
}

/// Where whole-file sync pushes and pulls the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SyncConfig {
    /// A WebDAV server
    Webdav(WebDavConfig),
    /// A directory acting as the remote (network share, synced folder)
    Directory(DirectorySyncConfig),
}

/// WebDAV server credentials and target path.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct WebDavConfig {
    pub url: String,
    pub username: String,
    pub password: String,
    #[serde(default = "default_remote_path")]
    pub remote_path: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl WebDavConfig {
    pub fn new(
        url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            username: username.into(),
            password: password.into(),
            remote_path: default_remote_path(),
            timeout_secs: default_timeout_secs(),
        }
    }

    pub fn with_remote_path(mut self, path: impl Into<String>) -> Self {
        self.remote_path = path.into();
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

impl fmt::Debug for WebDavConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebDavConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("remote_path", &self.remote_path)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// A local directory standing in for the remote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectorySyncConfig {
    pub root: PathBuf,
    #[serde(default = "default_remote_path")]
    pub remote_path: String,
}

impl DirectorySyncConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            remote_path: default_remote_path(),
        }
    }
}

fn default_remote_path() -> String {
    DEFAULT_REMOTE_PATH.to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

/// Search defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub max_results: usize,
    pub min_score: f64,
    pub use_graph_expansion: bool,
    /// Entries fetched from storage per search
    pub candidate_limit: usize,
    pub max_depth: usize,
    pub max_expansion: usize,
    /// Regex of separators between query tokens; the built-in one splits on
    /// whitespace and punctuation
    pub token_pattern: Option<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_results: 20,
            min_score: 0.1,
            use_graph_expansion: true,
            candidate_limit: 1000,
            max_depth: 2,
            max_expansion: 10,
            token_pattern: None,
        }
    }
}

/// Directory import defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Accepted extensions, with or without the leading dot
    pub extensions: Vec<String>,
    /// Files larger than this (bytes) are rejected
    pub max_file_size: u64,
    pub category: String,
    pub recursive: bool,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            extensions: [".md", ".txt", ".json", ".yaml", ".yml"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_file_size: 1024 * 1024,
            category: "imported".to_string(),
            recursive: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = MemoryConfig::from_json_str(
            r#"{ "db_path": "/data/memory.db", "search": { "max_results": 5 } }"#,
        )
        .unwrap();

        assert_eq!(config.db_path, PathBuf::from("/data/memory.db"));
        assert_eq!(config.search.max_results, 5);
        assert_eq!(config.search.min_score, 0.1);
        assert!(config.search.use_graph_expansion);
        assert_eq!(config.import, ImportConfig::default());
        assert!(config.sync.is_none());
    }

    #[test]
    fn test_webdav_sync_config() {
        let config = MemoryConfig::from_json_str(
            r#"{ "sync": { "type": "webdav", "url": "https://dav.example.com",
                 "username": "me", "password": "hunter2" } }"#,
        )
        .unwrap();

        match config.sync {
            Some(SyncConfig::Webdav(webdav)) => {
                assert_eq!(webdav.remote_path, "/memory-sync/data.db");
                assert_eq!(webdav.timeout_secs, 60);
                assert!(!format!("{:?}", webdav).contains("hunter2"));
            }
            other => panic!("unexpected sync config: {:?}", other),
        }
    }

    #[test]
    fn test_directory_sync_config() {
        let config = MemoryConfig::from_json_str(
            r#"{ "sync": { "type": "directory", "root": "/mnt/share" } }"#,
        )
        .unwrap();
        assert_eq!(
            config.sync,
            Some(SyncConfig::Directory(DirectorySyncConfig::new("/mnt/share")))
        );
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            MemoryConfig::from_json_str(r#"{ "search": { "min_score": -1.0 } }"#),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            MemoryConfig::from_json_str(r#"{ "max_keywords_per_entry": 0 }"#),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            MemoryConfig::from_json_str("not json"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_tilde_expansion() {
        let config = MemoryConfig::new("~/memory.db");
        let resolved = config.resolved_db_path();
        assert!(!resolved.starts_with("~"));
        assert!(resolved.ends_with("memory.db"));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.json");
        fs::write(&path, r#"{ "import": { "recursive": false } }"#).unwrap();

        let config = MemoryConfig::from_file(&path).unwrap();
        assert!(!config.import.recursive);
        assert_eq!(config.import.category, "imported");

        assert!(MemoryConfig::from_file(dir.path().join("missing.json")).is_err());
    }
}
