//! Batch import of files as entry drafts.
//!
//! The importer only reads the filesystem and derives keywords; persisting the
//! drafts and indexing them in the graph is the service's job.
//!
//! ## Example
//!
//! ```rust,ignore
//! use keyword_memory::config::ImportConfig;
//! use keyword_memory::importer::{FileImporter, ImportOptions};
//!
//! let importer = FileImporter::new(ImportConfig::default());
//! let batch = importer.import_directory("./notes".as_ref(), &ImportOptions::default())?;
//! println!("{} drafts, {} failures", batch.drafts.len(), batch.failures.len());
//! ```

mod extractor;

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::config::ImportConfig;
use crate::error::{Error, Result};
use crate::types::{now_millis, EntryDraft, Metadata};

pub use extractor::{DefaultKeywordExtractor, KeywordExtractor};

/// Per-call overrides of [`ImportConfig`]. `None` keeps the configured value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportOptions {
    pub extensions: Option<Vec<String>>,
    pub max_file_size: Option<u64>,
    pub category: Option<String>,
    pub recursive: Option<bool>,
}

impl ImportOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = Some(extensions.into_iter().map(Into::into).collect());
        self
    }

    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = Some(bytes);
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = Some(recursive);
        self
    }

    /// Resolve against the configured defaults.
    pub fn apply(&self, base: &ImportConfig) -> ImportConfig {
        ImportConfig {
            extensions: self
                .extensions
                .clone()
                .unwrap_or_else(|| base.extensions.clone()),
            max_file_size: self.max_file_size.unwrap_or(base.max_file_size),
            category: self.category.clone().unwrap_or_else(|| base.category.clone()),
            recursive: self.recursive.unwrap_or(base.recursive),
        }
    }
}

/// A file that could not be imported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportFailure {
    pub path: PathBuf,
    pub reason: String,
}

/// Drafts derived from a directory scan, plus the files that failed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportBatch {
    pub drafts: Vec<EntryDraft>,
    pub failures: Vec<ImportFailure>,
}

/// Turns files into entry drafts with derived keywords.
#[derive(Clone)]
pub struct FileImporter {
    config: ImportConfig,
    extractor: Arc<dyn KeywordExtractor>,
}

impl std::fmt::Debug for FileImporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileImporter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl FileImporter {
    /// Create an importer using the default keyword extractor.
    pub fn new(config: ImportConfig) -> Self {
        Self {
            config,
            extractor: Arc::new(DefaultKeywordExtractor::new()),
        }
    }

    /// Replace the keyword extractor.
    pub fn with_extractor(mut self, extractor: impl KeywordExtractor + 'static) -> Self {
        self.extractor = Arc::new(extractor);
        self
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    /// Scan `dir` for files with an accepted extension.
    ///
    /// Failing files are collected in [`ImportBatch::failures`] and the scan
    /// carries on. Only a missing or non-directory `dir` is an error.
    pub fn import_directory(&self, dir: &Path, options: &ImportOptions) -> Result<ImportBatch> {
        let config = options.apply(&self.config);
        if !dir.is_dir() {
            return Err(Error::validation(
                "directory",
                format!("{} is not a directory", dir.display()),
            ));
        }

        let mut batch = ImportBatch::default();
        let files = self.collect_files(dir, &config, &mut batch.failures)?;
        debug!(dir = %dir.display(), files = files.len(), "scanned import directory");

        for path in files {
            match self.draft_for(&path, &config) {
                Ok(draft) => batch.drafts.push(draft),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping file");
                    batch.failures.push(ImportFailure {
                        path,
                        reason: failure_reason(e),
                    });
                }
            }
        }

        Ok(batch)
    }

    /// Build a draft for a single file.
    pub fn import_file(&self, path: &Path, options: &ImportOptions) -> Result<EntryDraft> {
        let config = options.apply(&self.config);
        self.draft_for(path, &config)
    }

    fn collect_files(
        &self,
        dir: &Path,
        config: &ImportConfig,
        failures: &mut Vec<ImportFailure>,
    ) -> Result<BTreeSet<PathBuf>> {
        let root = dir
            .to_str()
            .ok_or_else(|| Error::validation("directory", "path is not valid UTF-8"))?;
        let root = Pattern::escape(root);
        let options = MatchOptions {
            case_sensitive: false,
            ..Default::default()
        };

        let mut files = BTreeSet::new();
        for ext in &config.extensions {
            let ext = Pattern::escape(&normalize_extension(ext));
            let pattern = if config.recursive {
                format!("{}/**/*{}", root, ext)
            } else {
                format!("{}/*{}", root, ext)
            };

            let entries = glob::glob_with(&pattern, options)
                .map_err(|e| Error::Internal(format!("bad import pattern {}: {}", pattern, e)))?;
            for entry in entries {
                match entry {
                    Ok(path) if path.is_file() => {
                        files.insert(path);
                    }
                    Ok(_) => {}
                    Err(e) => failures.push(ImportFailure {
                        path: e.path().to_path_buf(),
                        reason: e.error().to_string(),
                    }),
                }
            }
        }
        Ok(files)
    }

    fn draft_for(&self, path: &Path, config: &ImportConfig) -> Result<EntryDraft> {
        let extension = extension_of(path);
        let accepted = config
            .extensions
            .iter()
            .any(|ext| normalize_extension(ext) == extension);
        if !accepted {
            let shown = if extension.is_empty() { "(none)" } else { &extension };
            return Err(Error::import_file(
                path,
                format!("Unsupported file type: {}", shown),
            ));
        }

        let meta = fs::metadata(path).map_err(|e| Error::import_file(path, e.to_string()))?;
        if !meta.is_file() {
            return Err(Error::import_file(path, "Not a regular file"));
        }
        let size = meta.len();
        if size > config.max_file_size {
            return Err(Error::import_file(
                path,
                format!("File too large: {} bytes (max: {})", size, config.max_file_size),
            ));
        }

        let content = fs::read_to_string(path).map_err(|e| Error::import_file(path, e.to_string()))?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let keywords = self.extractor.extract(&content, &filename);

        let mut metadata = Metadata::new();
        metadata.insert("filename".to_string(), json!(filename));
        metadata.insert("extension".to_string(), json!(extension));
        metadata.insert("size".to_string(), json!(size));
        metadata.insert("importedAt".to_string(), json!(now_millis()));

        Ok(EntryDraft::new(content, keywords)
            .with_category(config.category.clone())
            .with_source(path.display().to_string())
            .with_metadata(metadata))
    }
}

/// `.md` for `md`, `.MD` and `.md`.
fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().to_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{}", ext)
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

fn failure_reason(err: Error) -> String {
    match err {
        Error::ImportFile { message, .. } => message,
        other => other.to_string(),
    }
}
