//! The memory service: storage, keyword graph, import and sync behind one handle.
//!
//! ```text
//! Uninitialized ──init──> Initializing ──> Ready ──close──> Closing ──> Closed
//!                                           ^                              │
//!                                           └────────────init──────────────┘
//! ```
//!
//! Every entry mutation runs under the write half of one lock, so the
//! read-then-write graph maintenance cannot interleave with another mutation
//! or with a sync. Reads and searches share the read half.
//!
//! ## Example
//!
//! ```rust,ignore
//! use keyword_memory::{EntryDraft, MemoryConfig, MemoryService, SearchRequest};
//!
//! let service = MemoryService::new(MemoryConfig::new("./memory.db"))?;
//! service.init().await?;
//!
//! service.create(EntryDraft::new("Prefer WAL for concurrent readers", ["sqlite", "wal"])).await?;
//! let hits = service.search(SearchRequest::new("sqlite")).await?;
//!
//! service.close().await?;
//! ```

mod tokenizer;

use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::config::MemoryConfig;
use crate::error::{Error, Result};
use crate::graph::{GraphSearchOptions, GraphStats, KeywordGraph, RelatedKeyword, TopKeyword};
use crate::importer::{FileImporter, ImportFailure, ImportOptions, KeywordExtractor};
use crate::storage::{SqliteStorage, StorageBackend};
use crate::sync::{backend_from_config, SyncBackend};
use crate::types::{EntryDraft, EntryPatch, ListQuery, MemoryEntry, SearchResult};

pub use tokenizer::{QueryTokenizer, DEFAULT_SEPARATORS};

/// Page size of the full scan behind a graph rebuild.
const REBUILD_PAGE_SIZE: usize = 500;

/// Lifecycle state of a [`MemoryService`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Uninitialized,
    Initializing,
    Ready,
    Closing,
    Closed,
}

/// A search query with optional per-call overrides of the search config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SearchRequest {
    pub query: String,
    pub category: Option<String>,
    pub max_results: Option<usize>,
    pub min_score: Option<f64>,
    pub use_expansion: Option<bool>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn max_results(mut self, max_results: usize) -> Self {
        self.max_results = Some(max_results);
        self
    }

    pub fn min_score(mut self, min_score: f64) -> Self {
        self.min_score = Some(min_score);
        self
    }

    pub fn use_expansion(mut self, enabled: bool) -> Self {
        self.use_expansion = Some(enabled);
        self
    }
}

/// Result of a directory import: what was stored and what was skipped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportReport {
    pub entries: Vec<MemoryEntry>,
    pub failures: Vec<ImportFailure>,
}

impl ImportReport {
    pub fn imported(&self) -> usize {
        self.entries.len()
    }
}

/// Outcome of a sync call. Sync failures are values, never errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// The local store was uploaded
    Pushed { bytes: usize },
    /// The local store was replaced by the remote copy
    Pulled { bytes: usize },
    /// No sync backend is configured
    NotConfigured,
    /// The remote holds no copy yet
    NoRemoteData,
    Failed { reason: String },
}

impl SyncOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Pushed { .. } | Self::Pulled { .. })
    }
}

struct Inner {
    state: ServiceState,
    graph: KeywordGraph,
}

/// Keyword-graph memory store.
///
/// Safe to share behind an `Arc`; see the module docs for how calls are
/// serialized.
pub struct MemoryService {
    config: MemoryConfig,
    storage: Box<dyn StorageBackend>,
    sync: Option<Box<dyn SyncBackend>>,
    importer: FileImporter,
    tokenizer: QueryTokenizer,
    inner: RwLock<Inner>,
}

impl MemoryService {
    /// Create a service backed by SQLite at the configured path, plus the
    /// configured sync backend if any. Nothing is opened until [`init`](Self::init).
    pub fn new(config: MemoryConfig) -> Result<Self> {
        let storage = SqliteStorage::new(config.resolved_db_path());
        let sync = config.sync.as_ref().map(backend_from_config).transpose()?;
        Self::with_backends(config, Box::new(storage), sync)
    }

    /// Create a service over explicit backends.
    pub fn with_backends(
        config: MemoryConfig,
        storage: Box<dyn StorageBackend>,
        sync: Option<Box<dyn SyncBackend>>,
    ) -> Result<Self> {
        config.validate()?;
        let tokenizer = QueryTokenizer::new(config.search.token_pattern.as_deref())?;
        let importer = FileImporter::new(config.import.clone());

        Ok(Self {
            config,
            storage,
            sync,
            importer,
            tokenizer,
            inner: RwLock::new(Inner {
                state: ServiceState::Uninitialized,
                graph: KeywordGraph::new(),
            }),
        })
    }

    /// Replace the keyword extractor used by imports.
    pub fn with_extractor(mut self, extractor: impl KeywordExtractor + 'static) -> Self {
        self.importer = self.importer.with_extractor(extractor);
        self
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub async fn state(&self) -> ServiceState {
        self.inner.read().await.state
    }

    // ==================== Lifecycle ====================

    /// Open storage and the sync backend, then load or rebuild the graph.
    ///
    /// A no-op when already Ready. A failed sync backend only logs a warning.
    #[instrument(skip(self))]
    pub async fn init(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.state == ServiceState::Ready {
            return Ok(());
        }

        let previous = inner.state;
        inner.state = ServiceState::Initializing;

        if let Some(sync) = &self.sync {
            if let Err(e) = sync.init().await {
                warn!(error = %e, "sync backend could not prepare the remote");
            }
        }

        match self.open_store() {
            Ok(graph) => {
                inner.graph = graph;
                inner.state = ServiceState::Ready;
                Ok(())
            }
            Err(e) => {
                inner.state = previous;
                Err(e)
            }
        }
    }

    /// Persist the graph snapshot and close storage.
    ///
    /// Does nothing unless Ready. Storage is closed even if the snapshot
    /// cannot be saved; the first error is returned.
    #[instrument(skip(self))]
    pub async fn close(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.state != ServiceState::Ready {
            return Ok(());
        }

        inner.state = ServiceState::Closing;
        let saved = self.storage.update_keyword_graph(&inner.graph.export());
        let closed = self.storage.close();
        inner.state = ServiceState::Closed;

        info!(nodes = inner.graph.len(), "memory service closed");
        saved.and(closed)
    }

    /// Open storage and produce the graph: the saved snapshot if present,
    /// otherwise a rebuild from every entry.
    fn open_store(&self) -> Result<KeywordGraph> {
        self.storage.init()?;

        match self.storage.get_keyword_graph() {
            Ok(nodes) if !nodes.is_empty() => {
                let graph = KeywordGraph::from_nodes(nodes);
                info!(nodes = graph.len(), "loaded keyword graph snapshot");
                Ok(graph)
            }
            Ok(_) => self.rebuild_from_storage(),
            Err(e) => {
                warn!(error = %e, "unreadable keyword graph snapshot, rebuilding");
                self.rebuild_from_storage()
            }
        }
    }

    fn rebuild_from_storage(&self) -> Result<KeywordGraph> {
        let mut entries = Vec::new();
        loop {
            let page = self.storage.list(
                &ListQuery::new()
                    .limit(REBUILD_PAGE_SIZE)
                    .offset(entries.len()),
            )?;
            let done = page.len() < REBUILD_PAGE_SIZE;
            entries.extend(page);
            if done {
                break;
            }
        }

        let mut graph = KeywordGraph::new();
        graph.build_from_entries(&entries);
        info!(
            entries = entries.len(),
            nodes = graph.len(),
            "rebuilt keyword graph"
        );
        Ok(graph)
    }

    // ==================== CRUD ====================

    pub async fn create(&self, draft: EntryDraft) -> Result<MemoryEntry> {
        draft.validate(self.config.max_keywords_per_entry)?;

        let mut inner = self.inner.write().await;
        ensure_ready(&inner)?;
        self.create_locked(&mut inner, draft)
    }

    fn create_locked(&self, inner: &mut Inner, draft: EntryDraft) -> Result<MemoryEntry> {
        let entry = self.storage.create(draft)?;
        inner.graph.add_entry(&entry);
        debug!(id = %entry.id, keywords = entry.keywords.len(), "created entry");
        Ok(entry)
    }

    pub async fn read(&self, id: &str) -> Result<Option<MemoryEntry>> {
        let inner = self.inner.read().await;
        ensure_ready(&inner)?;
        self.storage.read(id)
    }

    /// Merge `patch` into an entry and re-index it. `None` if the id is unknown.
    pub async fn update(&self, id: &str, patch: EntryPatch) -> Result<Option<MemoryEntry>> {
        patch.validate(self.config.max_keywords_per_entry)?;

        let mut inner = self.inner.write().await;
        ensure_ready(&inner)?;

        let Some(existing) = self.storage.read(id)? else {
            return Ok(None);
        };
        let updated = self.storage.update(id, patch)?;

        inner.graph.remove_entry(&existing);
        if let Some(entry) = &updated {
            inner.graph.add_entry(entry);
            debug!(id, "updated entry");
        }
        Ok(updated)
    }

    /// Returns whether the entry existed.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let mut inner = self.inner.write().await;
        ensure_ready(&inner)?;

        if let Some(existing) = self.storage.read(id)? {
            inner.graph.remove_entry(&existing);
        }
        let deleted = self.storage.delete(id)?;
        debug!(id, deleted, "deleted entry");
        Ok(deleted)
    }

    pub async fn list(&self, query: &ListQuery) -> Result<Vec<MemoryEntry>> {
        let inner = self.inner.read().await;
        ensure_ready(&inner)?;
        self.storage.list(query)
    }

    /// Store every draft in one transaction, then index them.
    pub async fn bulk_create(&self, drafts: Vec<EntryDraft>) -> Result<Vec<MemoryEntry>> {
        for (i, draft) in drafts.iter().enumerate() {
            draft
                .validate(self.config.max_keywords_per_entry)
                .map_err(|e| match e {
                    Error::Validation { field, message } => {
                        Error::validation(format!("drafts[{}].{}", i, field), message)
                    }
                    other => other,
                })?;
        }

        let mut inner = self.inner.write().await;
        ensure_ready(&inner)?;
        self.bulk_create_locked(&mut inner, drafts)
    }

    fn bulk_create_locked(&self, inner: &mut Inner, drafts: Vec<EntryDraft>) -> Result<Vec<MemoryEntry>> {
        if drafts.is_empty() {
            return Ok(Vec::new());
        }
        let created = self.storage.bulk_create(drafts)?;
        for entry in &created {
            inner.graph.add_entry(entry);
        }
        debug!(count = created.len(), "bulk created entries");
        Ok(created)
    }

    // ==================== Search ====================

    /// Rank stored entries against a free-text query.
    ///
    /// Query tokens are lower-cased and matched exactly against stored
    /// keywords, so an entry tagged `Rust` is not found by any query.
    pub async fn search(&self, request: SearchRequest) -> Result<Vec<SearchResult>> {
        let search = &self.config.search;
        let min_score = request.min_score.unwrap_or(search.min_score);
        if !min_score.is_finite() || min_score < 0.0 {
            return Err(Error::validation(
                "minScore",
                format!("must be a non-negative number, got {}", min_score),
            ));
        }

        let tokens = self.tokenizer.tokenize(&request.query);

        let inner = self.inner.read().await;
        ensure_ready(&inner)?;
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let mut candidates_query = ListQuery::new().limit(search.candidate_limit);
        candidates_query.category = request.category;
        let candidates = self.storage.list(&candidates_query)?;

        let options = GraphSearchOptions {
            max_results: request.max_results.unwrap_or(search.max_results),
            min_score,
            use_expansion: request.use_expansion.unwrap_or(search.use_graph_expansion),
            max_depth: search.max_depth,
            max_expansion: search.max_expansion,
        };
        let results = inner.graph.search(&tokens, &candidates, &options);

        debug!(
            tokens = tokens.len(),
            candidates = candidates.len(),
            results = results.len(),
            "search finished"
        );
        Ok(results)
    }

    // ==================== Graph ====================

    pub async fn related_keywords(&self, keyword: &str, limit: usize) -> Result<Vec<RelatedKeyword>> {
        let inner = self.inner.read().await;
        ensure_ready(&inner)?;
        Ok(inner.graph.related_keywords(keyword, limit))
    }

    pub async fn top_keywords(&self, limit: usize) -> Result<Vec<TopKeyword>> {
        let inner = self.inner.read().await;
        ensure_ready(&inner)?;
        Ok(inner.graph.top_keywords(limit))
    }

    pub async fn graph_stats(&self) -> Result<GraphStats> {
        let inner = self.inner.read().await;
        ensure_ready(&inner)?;
        Ok(inner.graph.stats())
    }

    /// Discard the in-memory graph and rebuild it from every stored entry.
    ///
    /// Recomputes IDF weights and drops edges left behind by deleted or
    /// updated entries.
    #[instrument(skip(self))]
    pub async fn rebuild_graph(&self) -> Result<GraphStats> {
        let mut inner = self.inner.write().await;
        ensure_ready(&inner)?;
        inner.graph = self.rebuild_from_storage()?;
        Ok(inner.graph.stats())
    }

    // ==================== Import ====================

    /// Import every accepted file under `dir`.
    ///
    /// Files that fail (unreadable, oversized, invalid keywords) are reported
    /// in [`ImportReport::failures`]; the rest are stored in one transaction.
    #[instrument(skip(self, dir, options), fields(dir = %dir.display()))]
    pub async fn import_directory(&self, dir: &Path, options: &ImportOptions) -> Result<ImportReport> {
        let mut inner = self.inner.write().await;
        ensure_ready(&inner)?;

        let batch = self.importer.import_directory(dir, options)?;
        let mut failures = batch.failures;
        let mut drafts = Vec::with_capacity(batch.drafts.len());
        for draft in batch.drafts {
            match draft.validate(self.config.max_keywords_per_entry) {
                Ok(()) => drafts.push(draft),
                Err(e) => {
                    let path = draft.source.clone().unwrap_or_default();
                    warn!(path = %path, error = %e, "skipping file");
                    failures.push(ImportFailure {
                        path: path.into(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let entries = self.bulk_create_locked(&mut inner, drafts)?;
        info!(
            imported = entries.len(),
            failed = failures.len(),
            "import finished"
        );
        Ok(ImportReport { entries, failures })
    }

    /// Import a single file as one entry.
    #[instrument(skip(self, path, options), fields(path = %path.display()))]
    pub async fn import_file(&self, path: &Path, options: &ImportOptions) -> Result<MemoryEntry> {
        let mut inner = self.inner.write().await;
        ensure_ready(&inner)?;

        let draft = self.importer.import_file(path, options)?;
        draft.validate(self.config.max_keywords_per_entry)?;
        self.create_locked(&mut inner, draft)
    }

    // ==================== Sync ====================

    /// Save the graph snapshot and upload the whole store.
    #[instrument(skip(self))]
    pub async fn sync_push(&self) -> SyncOutcome {
        let Some(sync) = &self.sync else {
            return SyncOutcome::NotConfigured;
        };

        let inner = self.inner.write().await;
        let pushed = match ensure_ready(&inner) {
            Ok(()) => self.push_locked(sync.as_ref(), &inner).await,
            Err(e) => Err(e),
        };

        match pushed {
            Ok(bytes) => {
                info!(bytes, "sync push completed");
                SyncOutcome::Pushed { bytes }
            }
            Err(e) => {
                warn!(error = %e, "sync push failed");
                SyncOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn push_locked(&self, sync: &dyn SyncBackend, inner: &Inner) -> Result<usize> {
        self.storage.update_keyword_graph(&inner.graph.export())?;
        let bytes = self.storage.export_bytes()?;
        sync.push(&bytes).await?;
        Ok(bytes.len())
    }

    /// Replace the local store with the remote copy and reload the graph.
    ///
    /// Local changes since the last push are lost. With no remote copy the
    /// local store is left untouched.
    #[instrument(skip(self))]
    pub async fn sync_pull(&self) -> SyncOutcome {
        let Some(sync) = &self.sync else {
            return SyncOutcome::NotConfigured;
        };

        let mut inner = self.inner.write().await;
        if let Err(e) = ensure_ready(&inner) {
            return SyncOutcome::Failed {
                reason: e.to_string(),
            };
        }

        let data = match sync.pull().await {
            Ok(Some(data)) => data,
            Ok(None) => return SyncOutcome::NoRemoteData,
            Err(e) => {
                warn!(error = %e, "sync pull failed");
                return SyncOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        inner.state = ServiceState::Closing;
        match self.replace_store(&data) {
            Ok(graph) => {
                inner.graph = graph;
                inner.state = ServiceState::Ready;
                info!(bytes = data.len(), "sync pull completed");
                SyncOutcome::Pulled { bytes: data.len() }
            }
            Err(e) => {
                warn!(error = %e, "sync pull failed, reopening local store");
                inner.state = match self.open_store() {
                    Ok(graph) => {
                        inner.graph = graph;
                        ServiceState::Ready
                    }
                    Err(_) => ServiceState::Closed,
                };
                SyncOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    fn replace_store(&self, data: &[u8]) -> Result<KeywordGraph> {
        self.storage.close()?;
        self.storage.restore_bytes(data)?;
        self.open_store()
    }

    /// Time of the last push as recorded remotely.
    pub async fn last_sync_time(&self) -> Option<i64> {
        match &self.sync {
            Some(sync) => sync.last_sync_time().await,
            None => None,
        }
    }
}

fn ensure_ready(inner: &Inner) -> Result<()> {
    match inner.state {
        ServiceState::Ready => Ok(()),
        state => Err(Error::StorageUnavailable(format!(
            "memory service is {:?}, not ready",
            state
        ))),
    }
}
