//! SQLite-backed storage implementation.

use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::error::{Error, Result};
use crate::storage::schema::initialize_schema;
use crate::storage::StorageBackend;
use crate::types::{now_millis, EntryDraft, EntryPatch, KeywordNode, ListQuery, MemoryEntry, Metadata};

const INSERT_ENTRY: &str = "INSERT INTO memories (
        id, content, keywords, category, source, metadata, created_at, updated_at
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)";

const SELECT_ENTRY: &str = "SELECT id, content, keywords, category, source, metadata,
        created_at, updated_at
    FROM memories";

#[derive(Debug, Clone)]
enum Location {
    File(PathBuf),
    Memory,
}

/// SQLite-backed entry store.
///
/// The connection is opened by [`StorageBackend::init`] and dropped by
/// [`StorageBackend::close`]; every other call fails with
/// [`Error::StorageUnavailable`] in between.
pub struct SqliteStorage {
    location: Location,
    conn: Mutex<Option<Connection>>,
}

impl SqliteStorage {
    /// Create a store for the database file at `path`. Nothing is opened yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            location: Location::File(path.into()),
            conn: Mutex::new(None),
        }
    }

    /// Create an in-memory store (for testing). Cannot be exported.
    pub fn in_memory() -> Self {
        Self {
            location: Location::Memory,
            conn: Mutex::new(None),
        }
    }

    /// Path of the database file, if file-backed.
    pub fn path(&self) -> Option<&Path> {
        match &self.location {
            Location::File(path) => Some(path),
            Location::Memory => None,
        }
    }

    /// Full-text search over content and keywords.
    ///
    /// A match expression FTS5 rejects yields no results rather than an error.
    pub fn search_fts(&self, query: &str, limit: usize) -> Result<Vec<MemoryEntry>> {
        let mut guard = self.lock()?;
        let conn = guard
            .as_mut()
            .ok_or_else(|| Error::StorageUnavailable("database not initialized".to_string()))?;

        let found = conn
            .prepare(
                "SELECT m.id, m.content, m.keywords, m.category, m.source, m.metadata,
                        m.created_at, m.updated_at
                 FROM memories m
                 JOIN memories_fts fts ON m.rowid = fts.rowid
                 WHERE memories_fts MATCH ?1
                 ORDER BY rank
                 LIMIT ?2",
            )
            .and_then(|mut stmt| {
                let entries = stmt
                    .query_map(params![query, limit as i64], row_to_entry)?
                    .collect::<rusqlite::Result<Vec<_>>>();
                entries
            });

        match found {
            Ok(entries) => Ok(entries),
            Err(e) => {
                debug!(query, error = %e, "full-text query rejected");
                Ok(Vec::new())
            }
        }
    }

    /// Number of stored entries.
    pub fn count(&self) -> Result<usize> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get::<_, i64>(0))
        })
        .map(|n| n as usize)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<Connection>>> {
        self.conn
            .lock()
            .map_err(|e| Error::Internal(format!("Failed to lock connection: {}", e)))
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> rusqlite::Result<T>,
    {
        let mut guard = self.lock()?;
        let conn = guard
            .as_mut()
            .ok_or_else(|| Error::StorageUnavailable("database not initialized".to_string()))?;
        f(conn).map_err(Error::from)
    }
}

impl StorageBackend for SqliteStorage {
    fn init(&self) -> Result<()> {
        let mut guard = self.lock()?;
        if guard.is_some() {
            return Ok(());
        }

        let conn = match &self.location {
            Location::File(path) => {
                if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                    fs::create_dir_all(dir)?;
                }
                Connection::open(path)?
            }
            Location::Memory => Connection::open_in_memory()?,
        };
        initialize_schema(&conn)?;

        debug!(location = ?self.location, "opened memory database");
        *guard = Some(conn);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut guard = self.lock()?;
        if let Some(conn) = guard.take() {
            conn.close().map_err(|(_, e)| Error::from(e))?;
            debug!(location = ?self.location, "closed memory database");
        }
        Ok(())
    }

    fn create(&self, draft: EntryDraft) -> Result<MemoryEntry> {
        let entry = draft.into_entry(now_millis());
        let row = EntryRow::encode(&entry)?;
        self.with_conn(|conn| row.insert(conn))?;
        Ok(entry)
    }

    fn read(&self, id: &str) -> Result<Option<MemoryEntry>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("{} WHERE id = ?1", SELECT_ENTRY),
                params![id],
                row_to_entry,
            )
            .optional()
        })
    }

    fn update(&self, id: &str, patch: EntryPatch) -> Result<Option<MemoryEntry>> {
        let mut guard = self.lock()?;
        let conn = guard
            .as_mut()
            .ok_or_else(|| Error::StorageUnavailable("database not initialized".to_string()))?;

        let tx = conn.transaction()?;
        let existing = tx
            .query_row(
                &format!("{} WHERE id = ?1", SELECT_ENTRY),
                params![id],
                row_to_entry,
            )
            .optional()?;
        let Some(mut entry) = existing else {
            return Ok(None);
        };

        patch.apply(&mut entry, now_millis());
        let row = EntryRow::encode(&entry)?;
        tx.execute(
            "UPDATE memories SET
                content = ?2, keywords = ?3, category = ?4, source = ?5,
                metadata = ?6, updated_at = ?7
             WHERE id = ?1",
            params![
                row.id,
                row.content,
                row.keywords,
                row.category,
                row.source,
                row.metadata,
                row.updated_at,
            ],
        )?;
        tx.commit()?;

        Ok(Some(entry))
    }

    fn delete(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let rows = conn.execute("DELETE FROM memories WHERE id = ?1", params![id])?;
            Ok(rows > 0)
        })
    }

    fn bulk_create(&self, drafts: Vec<EntryDraft>) -> Result<Vec<MemoryEntry>> {
        let now = now_millis();
        let entries: Vec<MemoryEntry> = drafts.into_iter().map(|d| d.into_entry(now)).collect();
        let rows = entries
            .iter()
            .map(EntryRow::encode)
            .collect::<Result<Vec<_>>>()?;

        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            for row in &rows {
                row.insert(&tx)?;
            }
            tx.commit()
        })?;

        Ok(entries)
    }

    fn list(&self, query: &ListQuery) -> Result<Vec<MemoryEntry>> {
        self.with_conn(|conn| {
            let limit = i64::try_from(query.limit).unwrap_or(i64::MAX);
            let offset = i64::try_from(query.offset).unwrap_or(i64::MAX);

            match &query.category {
                Some(category) => {
                    let mut stmt = conn.prepare(&format!(
                        "{} WHERE category = ?1 ORDER BY created_at DESC, rowid DESC LIMIT ?2 OFFSET ?3",
                        SELECT_ENTRY
                    ))?;
                    let entries: rusqlite::Result<Vec<MemoryEntry>> = stmt
                        .query_map(params![category, limit, offset], row_to_entry)?
                        .collect();
                    entries
                }
                None => {
                    let mut stmt = conn.prepare(&format!(
                        "{} ORDER BY created_at DESC, rowid DESC LIMIT ?1 OFFSET ?2",
                        SELECT_ENTRY
                    ))?;
                    let entries: rusqlite::Result<Vec<MemoryEntry>> = stmt
                        .query_map(params![limit, offset], row_to_entry)?
                        .collect();
                    entries
                }
            }
        })
    }

    fn get_keyword_graph(&self) -> Result<HashMap<String, KeywordNode>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT keyword, weight, connections FROM keyword_graph")?;
            let nodes: rusqlite::Result<HashMap<String, KeywordNode>> = stmt
                .query_map([], |row| {
                    let keyword: String = row.get(0)?;
                    let connections: HashMap<String, u64> = parse_json_column(row, 2)?;
                    Ok((
                        keyword.clone(),
                        KeywordNode {
                            keyword,
                            weight: row.get(1)?,
                            connections,
                        },
                    ))
                })?
                .collect();
            nodes
        })
    }

    fn update_keyword_graph(&self, nodes: &HashMap<String, KeywordNode>) -> Result<()> {
        let rows = nodes
            .iter()
            .map(|(keyword, node)| {
                Ok((
                    keyword.as_str(),
                    node.weight,
                    serde_json::to_string(&node.connections)?,
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM keyword_graph", [])?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO keyword_graph (keyword, weight, connections) VALUES (?1, ?2, ?3)",
                )?;
                for (keyword, weight, connections) in &rows {
                    stmt.execute(params![keyword, weight, connections])?;
                }
            }
            tx.commit()
        })?;

        debug!(nodes = nodes.len(), "saved keyword graph snapshot");
        Ok(())
    }

    fn export_bytes(&self) -> Result<Vec<u8>> {
        let Location::File(path) = &self.location else {
            return Err(Error::Storage(
                "in-memory database cannot be exported".to_string(),
            ));
        };

        // Hold the lock across the read so no write lands between checkpoint and read
        let guard = self.lock()?;
        let conn = guard
            .as_ref()
            .ok_or_else(|| Error::StorageUnavailable("database not initialized".to_string()))?;
        conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
        let bytes = fs::read(path)?;
        drop(guard);

        Ok(bytes)
    }

    fn restore_bytes(&self, bytes: &[u8]) -> Result<()> {
        let Location::File(path) = &self.location else {
            return Err(Error::Storage(
                "in-memory database cannot be restored".to_string(),
            ));
        };

        let guard = self.lock()?;
        if guard.is_some() {
            return Err(Error::Storage(
                "database must be closed before it is replaced".to_string(),
            ));
        }

        if bytes.is_empty() {
            return Err(Error::Storage(
                "replacement database is empty".to_string(),
            ));
        }

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }

        // The current file is only replaced once the incoming copy opens and checks clean
        let incoming = with_suffix(path, ".incoming");
        fs::write(&incoming, bytes)?;
        let checked = check_database(&incoming);
        remove_sidecars(&incoming)?;
        if let Err(e) = checked {
            remove_if_exists(&incoming)?;
            return Err(e);
        }
        fs::rename(&incoming, path)?;

        // A leftover WAL from the old file would be replayed onto the new one
        remove_sidecars(path)?;
        drop(guard);

        debug!(path = %path.display(), bytes = bytes.len(), "replaced memory database");
        Ok(())
    }
}

/// Column values of one `memories` row.
struct EntryRow<'a> {
    id: &'a str,
    content: &'a str,
    keywords: String,
    category: Option<&'a str>,
    source: Option<&'a str>,
    metadata: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl<'a> EntryRow<'a> {
    fn encode(entry: &'a MemoryEntry) -> Result<Self> {
        Ok(Self {
            id: &entry.id,
            content: &entry.content,
            keywords: serde_json::to_string(&entry.keywords)?,
            category: entry.category.as_deref(),
            source: entry.source.as_deref(),
            metadata: entry
                .metadata
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            created_at: entry.created_at,
            updated_at: entry.updated_at,
        })
    }

    fn insert(&self, conn: &Connection) -> rusqlite::Result<()> {
        conn.execute(
            INSERT_ENTRY,
            params![
                self.id,
                self.content,
                self.keywords,
                self.category,
                self.source,
                self.metadata,
                self.created_at,
                self.updated_at,
            ],
        )?;
        Ok(())
    }
}

fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<MemoryEntry> {
    let keywords: Vec<String> = parse_json_column(row, 2)?;
    let metadata: Option<Metadata> = match row.get::<_, Option<String>>(5)? {
        Some(raw) => Some(
            serde_json::from_str(&raw)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?,
        ),
        None => None,
    };

    Ok(MemoryEntry {
        id: row.get(0)?,
        content: row.get(1)?,
        keywords,
        category: row.get(3)?,
        source: row.get(4)?,
        metadata,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn parse_json_column<T: serde::de::DeserializeOwned>(
    row: &rusqlite::Row,
    idx: usize,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Open `path` and run `PRAGMA quick_check` over it.
fn check_database(path: &Path) -> Result<()> {
    let invalid = |reason: String| {
        Error::Storage(format!("{} is not a usable database: {}", path.display(), reason))
    };

    let conn = Connection::open(path).map_err(|e| invalid(e.to_string()))?;
    let verdict: String = conn
        .query_row("PRAGMA quick_check", [], |row| row.get(0))
        .map_err(|e| invalid(e.to_string()))?;
    conn.close().map_err(|(_, e)| invalid(e.to_string()))?;

    if verdict != "ok" {
        return Err(invalid(verdict));
    }
    Ok(())
}

fn remove_sidecars(path: &Path) -> Result<()> {
    for suffix in ["-wal", "-shm"] {
        remove_if_exists(&with_suffix(path, suffix))?;
    }
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn store() -> SqliteStorage {
        let store = SqliteStorage::in_memory();
        store.init().unwrap();
        store
    }

    fn draft(content: &str, keywords: &[&str]) -> EntryDraft {
        EntryDraft::new(content, keywords.iter().copied())
    }

    #[test]
    fn test_create_and_read_round_trip() {
        let store = store();
        let mut metadata = Metadata::new();
        metadata.insert("filename".to_string(), json!("notes.md"));
        metadata.insert("size".to_string(), json!(42));

        let input = draft("WAL keeps readers unblocked", &["sqlite", "wal"])
            .with_category("databases")
            .with_source("notes.md")
            .with_metadata(metadata);
        let created = store.create(input.clone()).unwrap();

        assert!(!created.id.is_empty());
        assert_eq!(created.created_at, created.updated_at);

        let read = store.read(&created.id).unwrap().unwrap();
        assert_eq!(read, created);
        assert_eq!(read.to_draft(), input);
    }

    #[test]
    fn test_read_missing_is_none() {
        let store = store();
        assert!(store.read("nope").unwrap().is_none());
    }

    #[test]
    fn test_update_merges_fields() {
        let store = store();
        let created = store
            .create(draft("old", &["a"]).with_category("notes"))
            .unwrap();

        let updated = store
            .update(&created.id, EntryPatch::new().keywords(["a", "b"]))
            .unwrap()
            .unwrap();

        assert_eq!(updated.content, "old");
        assert_eq!(updated.keywords, vec!["a", "b"]);
        assert_eq!(updated.category.as_deref(), Some("notes"));
        assert_eq!(updated.created_at, created.created_at);
        assert!(updated.updated_at >= created.updated_at);
        assert_eq!(store.read(&created.id).unwrap().unwrap(), updated);
    }

    #[test]
    fn test_update_missing_is_none() {
        let store = store();
        assert!(store
            .update("missing", EntryPatch::new().content("x"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_delete_twice() {
        let store = store();
        let created = store.create(draft("x", &["a"])).unwrap();

        assert!(store.delete(&created.id).unwrap());
        assert!(!store.delete(&created.id).unwrap());
        assert!(store.read(&created.id).unwrap().is_none());
    }

    #[test]
    fn test_bulk_create_assigns_ids() {
        let store = store();
        let created = store
            .bulk_create(vec![draft("one", &["a"]), draft("two", &["b"])])
            .unwrap();

        assert_eq!(created.len(), 2);
        assert_ne!(created[0].id, created[1].id);
        assert_eq!(created[0].created_at, created[1].created_at);
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn test_bulk_create_is_all_or_nothing() {
        let store = store();
        store
            .with_conn(|conn| {
                conn.execute_batch(
                    "CREATE TRIGGER reject_boom BEFORE INSERT ON memories
                     WHEN NEW.content = 'boom'
                     BEGIN SELECT RAISE(ABORT, 'forced failure'); END;",
                )
            })
            .unwrap();

        let result = store.bulk_create(vec![
            draft("first", &["a"]),
            draft("boom", &["b"]),
            draft("third", &["c"]),
        ]);

        assert!(matches!(result, Err(Error::Storage(_))));
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_list_order_filter_and_pagination() {
        let store = store();
        let a = store.create(draft("a", &["x"]).with_category("one")).unwrap();
        let b = store.create(draft("b", &["x"]).with_category("two")).unwrap();
        let c = store.create(draft("c", &["x"]).with_category("one")).unwrap();

        let all = store.list(&ListQuery::new()).unwrap();
        let ids: Vec<&str> = all.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec![c.id.as_str(), b.id.as_str(), a.id.as_str()]);

        let one = store.list(&ListQuery::new().category("one")).unwrap();
        assert_eq!(one.len(), 2);
        assert!(one.iter().all(|e| e.category.as_deref() == Some("one")));

        let page = store.list(&ListQuery::new().limit(1).offset(1)).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, b.id);
    }

    #[test]
    fn test_keyword_graph_snapshot_round_trip() {
        let store = store();
        assert!(store.get_keyword_graph().unwrap().is_empty());

        let mut nodes = HashMap::new();
        let mut rust = KeywordNode::new("rust");
        rust.weight = 2.5;
        rust.connections.insert("sqlite".to_string(), 3);
        let mut sqlite = KeywordNode::new("sqlite");
        sqlite.connections.insert("rust".to_string(), 3);
        nodes.insert("rust".to_string(), rust);
        nodes.insert("sqlite".to_string(), sqlite);

        store.update_keyword_graph(&nodes).unwrap();
        assert_eq!(store.get_keyword_graph().unwrap(), nodes);

        // A later snapshot replaces the earlier one entirely
        nodes.remove("sqlite");
        store.update_keyword_graph(&nodes).unwrap();
        assert_eq!(store.get_keyword_graph().unwrap(), nodes);
    }

    #[test]
    fn test_uninitialized_and_closed_are_unavailable() {
        let store = SqliteStorage::in_memory();
        assert!(matches!(store.read("x"), Err(Error::StorageUnavailable(_))));

        store.init().unwrap();
        store.init().unwrap();
        store.close().unwrap();

        assert!(matches!(
            store.create(draft("x", &["a"])),
            Err(Error::StorageUnavailable(_))
        ));
    }

    #[test]
    fn test_search_fts() {
        let store = store();
        store.create(draft("The authentication system uses JWT", &["auth"])).unwrap();
        store.create(draft("Database uses PostgreSQL", &["db"])).unwrap();

        let results = store.search_fts("authentication", 10).unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].content.contains("authentication"));

        assert!(store.search_fts("\"unbalanced", 10).unwrap().is_empty());
    }

    #[test]
    fn test_export_and_restore_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = SqliteStorage::new(dir.path().join("source.db"));
        source.init().unwrap();
        let created = source.create(draft("synced", &["sync"])).unwrap();
        let bytes = source.export_bytes().unwrap();
        source.close().unwrap();

        let target = SqliteStorage::new(dir.path().join("nested").join("target.db"));
        target.restore_bytes(&bytes).unwrap();
        target.init().unwrap();

        assert_eq!(target.read(&created.id).unwrap().unwrap(), created);
    }

    #[test]
    fn test_restore_requires_closed_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStorage::new(dir.path().join("memory.db"));
        store.init().unwrap();

        assert!(matches!(store.restore_bytes(b"data"), Err(Error::Storage(_))));
    }

    #[test]
    fn test_restore_rejects_invalid_bytes_and_keeps_current_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.db");
        let store = SqliteStorage::new(&path);
        store.init().unwrap();
        let created = store.create(draft("kept", &["local"])).unwrap();
        store.close().unwrap();
        let before = fs::read(&path).unwrap();

        let err = store
            .restore_bytes(b"this is not a sqlite database, just text")
            .unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert!(matches!(store.restore_bytes(b""), Err(Error::Storage(_))));

        assert_eq!(fs::read(&path).unwrap(), before);
        assert!(!dir.path().join("memory.db.incoming").exists());

        store.init().unwrap();
        assert_eq!(store.read(&created.id).unwrap().unwrap(), created);
    }

    #[test]
    fn test_in_memory_cannot_export() {
        let store = store();
        assert!(store.export_bytes().is_err());
    }
}
