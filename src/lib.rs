//! # keyword-memory
//!
//! A memory store for short notes tagged with keywords. Retrieval goes through
//! a keyword co-occurrence graph, so a query can find entries whose keywords it
//! never mentions.
//!
//! ## Core Components
//!
//! - **Graph**: Weighted co-occurrence graph, IDF weights, breadth-first query expansion
//! - **Storage**: SQLite persistence for entries and the graph snapshot
//! - **Importer**: Directory scans that derive keywords from files
//! - **Sync**: Whole-file push/pull of the database (WebDAV or a directory)
//! - **Service**: Lifecycle, CRUD with graph maintenance, search, import, sync
//!
//! ## Example
//!
//! ```rust,ignore
//! use keyword_memory::{EntryDraft, MemoryConfig, MemoryService, SearchRequest};
//!
//! let service = MemoryService::new(MemoryConfig::new("./memory.db"))?;
//! service.init().await?;
//!
//! service.create(EntryDraft::new("JWT tokens expire after 1h", ["auth", "jwt"])).await?;
//! service.create(EntryDraft::new("Refresh via /token endpoint", ["jwt", "refresh"])).await?;
//!
//! // "auth" reaches the second entry through the shared "jwt" keyword
//! for hit in service.search(SearchRequest::new("auth").min_score(0.01)).await? {
//!     println!("{:.3} {}", hit.score, hit.entry.content);
//! }
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod importer;
pub mod service;
pub mod storage;
pub mod sync;
pub mod types;

// Re-exports for convenience
pub use config::{
    DirectorySyncConfig, ImportConfig, MemoryConfig, SearchConfig, SyncConfig, WebDavConfig,
};
pub use error::{Error, Result};
pub use graph::{GraphSearchOptions, GraphStats, KeywordGraph, RelatedKeyword, TopKeyword};
pub use importer::{
    DefaultKeywordExtractor, FileImporter, ImportBatch, ImportFailure, ImportOptions,
    KeywordExtractor,
};
pub use service::{
    ImportReport, MemoryService, QueryTokenizer, SearchRequest, ServiceState, SyncOutcome,
};
pub use storage::{SqliteStorage, StorageBackend};
pub use sync::{DirectorySync, SyncBackend, SyncMeta, WebDavSync};
pub use types::{
    EntryDraft, EntryPatch, KeywordNode, ListQuery, MemoryEntry, Metadata, SearchResult,
};
