//! Core data types: memory entries, keyword nodes, and search results.

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Opaque key/value bag attached to an entry.
pub type Metadata = HashMap<String, Value>;

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// A stored memory entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryEntry {
    /// Unique identifier, assigned by storage
    pub id: String,
    /// Free-text content
    pub content: String,
    /// Keyword tokens; a set as far as the graph is concerned. Stored as
    /// given, but search lower-cases the query, so keywords are expected in
    /// lower case.
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Where the entry came from (file path, URL, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    /// Creation time in epoch milliseconds
    pub created_at: i64,
    /// Last update time in epoch milliseconds, never below `created_at`
    pub updated_at: i64,
}

impl MemoryEntry {
    /// Keywords with duplicates removed, first occurrence wins.
    pub fn distinct_keywords(&self) -> Vec<&str> {
        distinct(&self.keywords)
    }

    /// Split the entry back into its draft fields.
    pub fn to_draft(&self) -> EntryDraft {
        EntryDraft {
            content: self.content.clone(),
            keywords: self.keywords.clone(),
            category: self.category.clone(),
            source: self.source.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

pub(crate) fn distinct(keywords: &[String]) -> Vec<&str> {
    let mut seen = std::collections::HashSet::new();
    keywords
        .iter()
        .map(String::as_str)
        .filter(|kw| seen.insert(*kw))
        .collect()
}

/// An entry that has not been stored yet (no id, no timestamps).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryDraft {
    pub content: String,
    /// Expected in lower case; see [`MemoryEntry::keywords`]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl EntryDraft {
    /// Create a draft with content and keywords.
    pub fn new<I, S>(content: impl Into<String>, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            content: content.into(),
            keywords: keywords.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Check field-level constraints before the draft reaches storage.
    pub fn validate(&self, max_keywords: usize) -> Result<()> {
        validate_keywords(&self.keywords, max_keywords)
    }

    /// Materialize the draft as an entry with a fresh id and timestamp.
    pub(crate) fn into_entry(self, now: i64) -> MemoryEntry {
        MemoryEntry {
            id: uuid::Uuid::new_v4().to_string(),
            content: self.content,
            keywords: self.keywords,
            category: self.category,
            source: self.source,
            metadata: self.metadata,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update of an entry. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl EntryPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = Some(keywords.into_iter().map(Into::into).collect());
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn validate(&self, max_keywords: usize) -> Result<()> {
        match &self.keywords {
            Some(keywords) => validate_keywords(keywords, max_keywords),
            None => Ok(()),
        }
    }

    /// Merge into an existing entry. `updated_at` never moves backwards.
    pub(crate) fn apply(self, entry: &mut MemoryEntry, now: i64) {
        if let Some(content) = self.content {
            entry.content = content;
        }
        if let Some(keywords) = self.keywords {
            entry.keywords = keywords;
        }
        if let Some(category) = self.category {
            entry.category = Some(category);
        }
        if let Some(source) = self.source {
            entry.source = Some(source);
        }
        if let Some(metadata) = self.metadata {
            entry.metadata = Some(metadata);
        }
        entry.updated_at = now.max(entry.updated_at).max(entry.created_at);
    }
}

fn validate_keywords(keywords: &[String], max_keywords: usize) -> Result<()> {
    if keywords.iter().any(|kw| kw.trim().is_empty()) {
        return Err(Error::validation(
            "keywords",
            "must not contain blank values",
        ));
    }
    let distinct = distinct(keywords).len();
    if distinct > max_keywords {
        return Err(Error::validation(
            "keywords",
            format!("{} distinct keywords exceeds the limit of {}", distinct, max_keywords),
        ));
    }
    Ok(())
}

/// A node of the keyword co-occurrence graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordNode {
    pub keyword: String,
    /// IDF-style importance, `ln(N / df) + 1` after a full rebuild
    pub weight: f64,
    /// Neighbor keyword -> co-occurrence count
    pub connections: HashMap<String, u64>,
}

impl KeywordNode {
    pub fn new(keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            weight: 1.0,
            connections: HashMap::new(),
        }
    }
}

/// A ranked search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub entry: MemoryEntry,
    pub score: f64,
    /// The entry keywords that contributed to the score
    pub matched_keywords: Vec<String>,
}

/// Pagination and filtering for listing entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListQuery {
    pub category: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            category: None,
            limit: 100,
            offset: 0,
        }
    }
}

impl ListQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }
}
