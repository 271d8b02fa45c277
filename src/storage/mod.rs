//! Durable storage for entries and the keyword graph snapshot.
//!
//! [`StorageBackend`] is the capability set the service needs; [`SqliteStorage`]
//! is the embedded implementation. Entries and the graph snapshot share one
//! database so that a whole-file sync carries both.
//!
//! ## Example
//!
//! ```rust,ignore
//! use keyword_memory::storage::{SqliteStorage, StorageBackend};
//! use keyword_memory::types::EntryDraft;
//!
//! let storage = SqliteStorage::new("./memory.db");
//! storage.init()?;
//!
//! let entry = storage.create(EntryDraft::new("Use WAL mode", ["sqlite", "wal"]))?;
//! assert!(storage.read(&entry.id)?.is_some());
//! ```

mod schema;
mod sqlite;

use std::collections::HashMap;

use crate::error::Result;
use crate::types::{EntryDraft, EntryPatch, KeywordNode, ListQuery, MemoryEntry};

pub use schema::{get_schema_version, initialize_schema, is_initialized, SCHEMA_VERSION};
pub use sqlite::SqliteStorage;

/// Storage operations required by the memory service.
///
/// Missing ids are reported through `Option`/`bool`; `Err` means the store is
/// unavailable or failed.
pub trait StorageBackend: Send + Sync {
    /// Open the store and ensure the schema exists. Idempotent.
    fn init(&self) -> Result<()>;

    /// Release the underlying handle. Calls after this fail until `init`.
    fn close(&self) -> Result<()>;

    /// Insert a draft with a fresh id and timestamps.
    fn create(&self, draft: EntryDraft) -> Result<MemoryEntry>;

    fn read(&self, id: &str) -> Result<Option<MemoryEntry>>;

    /// Merge a patch into an existing entry and bump `updated_at`.
    fn update(&self, id: &str, patch: EntryPatch) -> Result<Option<MemoryEntry>>;

    /// Returns whether a row was removed.
    fn delete(&self, id: &str) -> Result<bool>;

    /// Insert every draft or none of them.
    fn bulk_create(&self, drafts: Vec<EntryDraft>) -> Result<Vec<MemoryEntry>>;

    /// Entries newest first.
    fn list(&self, query: &ListQuery) -> Result<Vec<MemoryEntry>>;

    /// Load the persisted graph snapshot (empty if none was saved).
    fn get_keyword_graph(&self) -> Result<HashMap<String, KeywordNode>>;

    /// Replace the persisted graph snapshot.
    fn update_keyword_graph(&self, nodes: &HashMap<String, KeywordNode>) -> Result<()>;

    /// Raw bytes of the whole store, suitable for a whole-file sync.
    fn export_bytes(&self) -> Result<Vec<u8>>;

    /// Overwrite the whole store with previously exported bytes.
    ///
    /// Only valid while closed.
    fn restore_bytes(&self, bytes: &[u8]) -> Result<()>;
}
