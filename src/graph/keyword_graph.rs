//! Weighted keyword co-occurrence graph with an inverted index.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::types::{KeywordNode, MemoryEntry, SearchResult};

/// Options for [`KeywordGraph::search`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSearchOptions {
    pub max_results: usize,
    /// Results scoring below this (after normalization) are dropped
    pub min_score: f64,
    /// Expand the query through the graph instead of matching tokens exactly
    pub use_expansion: bool,
    pub max_depth: usize,
    /// Neighbors followed per frontier node
    pub max_expansion: usize,
}

impl Default for GraphSearchOptions {
    fn default() -> Self {
        Self {
            max_results: 20,
            min_score: 0.1,
            use_expansion: true,
            max_depth: 2,
            max_expansion: 10,
        }
    }
}

impl GraphSearchOptions {
    pub fn exact() -> Self {
        Self {
            use_expansion: false,
            ..Default::default()
        }
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn with_min_score(mut self, min_score: f64) -> Self {
        self.min_score = min_score;
        self
    }
}

/// A neighbor of a keyword, ranked by `edge weight * neighbor weight`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedKeyword {
    pub keyword: String,
    pub score: f64,
}

/// A keyword ranked by `weight * connection count`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopKeyword {
    pub keyword: String,
    pub weight: f64,
    pub connections: usize,
}

/// Size summary of the graph.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphStats {
    pub nodes: usize,
    /// Undirected edge count
    pub edges: usize,
    pub avg_connections: f64,
}

/// In-memory keyword co-occurrence graph.
///
/// Edges count how many entries contain both endpoints and are kept symmetric.
/// Nodes and edges only ever grow: removing an entry touches the inverted
/// index alone, and node weights are only recomputed by
/// [`build_from_entries`](Self::build_from_entries).
#[derive(Debug, Clone, Default)]
pub struct KeywordGraph {
    nodes: HashMap<String, KeywordNode>,
    /// keyword -> ids of entries currently holding it
    inverted_index: HashMap<String, HashSet<String>>,
}

impl KeywordGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore a graph from an exported node map.
    ///
    /// The inverted index starts empty; it only serves removal bookkeeping.
    pub fn from_nodes(nodes: HashMap<String, KeywordNode>) -> Self {
        let nodes = nodes
            .into_iter()
            .map(|(keyword, mut node)| {
                node.keyword = keyword.clone();
                (keyword, node)
            })
            .collect();
        Self {
            nodes,
            inverted_index: HashMap::new(),
        }
    }

    /// Reset and rebuild the graph from scratch, recomputing IDF weights.
    pub fn build_from_entries(&mut self, entries: &[MemoryEntry]) {
        self.nodes.clear();
        self.inverted_index.clear();

        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        for entry in entries {
            let keywords = entry.distinct_keywords();
            for kw in &keywords {
                self.index_entry(kw, &entry.id);
                self.ensure_node(kw);
                *doc_freq.entry((*kw).to_string()).or_insert(0) += 1;
            }
            self.add_pairs(&keywords);
        }

        let total_docs = entries.len();
        for (keyword, node) in self.nodes.iter_mut() {
            let df = doc_freq.get(keyword).copied().unwrap_or(0);
            node.weight = idf_weight(total_docs, df);
        }
    }

    /// Increment the co-occurrence count between two keywords, creating
    /// missing endpoints with weight 1.
    pub fn add_edge(&mut self, a: &str, b: &str) {
        self.ensure_node(a);
        self.ensure_node(b);
        if a == b {
            return;
        }
        if let Some(node) = self.nodes.get_mut(a) {
            *node.connections.entry(b.to_string()).or_insert(0) += 1;
        }
        if let Some(node) = self.nodes.get_mut(b) {
            *node.connections.entry(a.to_string()).or_insert(0) += 1;
        }
    }

    /// Index a newly stored entry. Existing node weights are left alone.
    pub fn add_entry(&mut self, entry: &MemoryEntry) {
        let keywords = entry.distinct_keywords();
        for kw in &keywords {
            self.index_entry(kw, &entry.id);
            self.ensure_node(kw);
        }
        self.add_pairs(&keywords);
    }

    /// Drop the entry from the inverted index. Nodes and edges stay.
    pub fn remove_entry(&mut self, entry: &MemoryEntry) {
        for kw in &entry.keywords {
            if let Some(ids) = self.inverted_index.get_mut(kw) {
                ids.remove(&entry.id);
            }
        }
    }

    /// Breadth-first expansion from seed keywords.
    ///
    /// Seeds present in the graph score 1.0. A keyword first reached at depth
    /// `d` scores `(edge / 10) * weight / (d + 2)`.
    pub fn expand_query(
        &self,
        seeds: &[String],
        max_depth: usize,
        max_expansion: usize,
    ) -> HashMap<String, f64> {
        let mut scores = HashMap::new();
        let mut visited: HashSet<&str> = HashSet::new();

        let mut frontier: Vec<&str> = Vec::new();
        for seed in seeds {
            if let Some((key, _)) = self.nodes.get_key_value(seed.as_str()) {
                if visited.insert(key.as_str()) {
                    scores.insert(key.clone(), 1.0);
                    frontier.push(key.as_str());
                }
            }
        }

        let mut depth = 0;
        while depth < max_depth && !frontier.is_empty() {
            let decay = 1.0 / (depth as f64 + 2.0);
            let mut next = Vec::new();

            for kw in &frontier {
                let Some(node) = self.nodes.get(*kw) else {
                    continue;
                };
                for (neighbor, edge_weight) in ranked_neighbors(node, max_expansion) {
                    if visited.contains(neighbor) {
                        continue;
                    }
                    let Some(neighbor_node) = self.nodes.get(neighbor) else {
                        continue;
                    };
                    visited.insert(neighbor_node.keyword.as_str());
                    let score = (edge_weight as f64 / 10.0) * neighbor_node.weight * decay;
                    scores.insert(neighbor.to_string(), score);
                    next.push(neighbor_node.keyword.as_str());
                }
            }

            frontier = next;
            depth += 1;
        }

        scores
    }

    /// Rank candidate entries against query tokens.
    ///
    /// Each entry scores the sum of its matched keyword scores divided by
    /// `sqrt(keyword count)`. Ties keep candidate order.
    pub fn search(
        &self,
        query: &[String],
        candidates: &[MemoryEntry],
        options: &GraphSearchOptions,
    ) -> Vec<SearchResult> {
        let query_scores: HashMap<String, f64> = if options.use_expansion {
            self.expand_query(query, options.max_depth, options.max_expansion)
        } else {
            query.iter().map(|q| (q.clone(), 1.0)).collect()
        };

        let mut results = Vec::new();
        for entry in candidates {
            let mut score = 0.0;
            let mut matched = Vec::new();
            for kw in entry.distinct_keywords() {
                if let Some(kw_score) = query_scores.get(kw) {
                    score += kw_score;
                    matched.push(kw.to_string());
                }
            }

            if matched.is_empty() || score < 0.0 {
                continue;
            }
            let normalized = score / (entry.keywords.len() as f64).sqrt();
            if normalized >= options.min_score {
                results.push(SearchResult {
                    entry: entry.clone(),
                    score: normalized,
                    matched_keywords: matched,
                });
            }
        }

        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(options.max_results);
        results
    }

    /// Neighbors of `keyword`, strongest first.
    pub fn related_keywords(&self, keyword: &str, limit: usize) -> Vec<RelatedKeyword> {
        let Some(node) = self.nodes.get(keyword) else {
            return Vec::new();
        };

        let mut related: Vec<RelatedKeyword> = node
            .connections
            .iter()
            .map(|(kw, edge_weight)| RelatedKeyword {
                keyword: kw.clone(),
                score: *edge_weight as f64 * self.nodes.get(kw).map_or(1.0, |n| n.weight),
            })
            .collect();
        related.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.keyword.cmp(&b.keyword))
        });
        related.truncate(limit);
        related
    }

    /// Most central keywords by `weight * connection count`.
    pub fn top_keywords(&self, limit: usize) -> Vec<TopKeyword> {
        let mut top: Vec<TopKeyword> = self
            .nodes
            .values()
            .map(|node| TopKeyword {
                keyword: node.keyword.clone(),
                weight: node.weight,
                connections: node.connections.len(),
            })
            .collect();
        top.sort_by(|a, b| {
            let rank_a = a.weight * a.connections as f64;
            let rank_b = b.weight * b.connections as f64;
            rank_b
                .total_cmp(&rank_a)
                .then_with(|| a.keyword.cmp(&b.keyword))
        });
        top.truncate(limit);
        top
    }

    /// Copy of the full node map, for persistence.
    pub fn export(&self) -> HashMap<String, KeywordNode> {
        self.nodes.clone()
    }

    pub fn stats(&self) -> GraphStats {
        let total: usize = self.nodes.values().map(|n| n.connections.len()).sum();
        let nodes = self.nodes.len();
        GraphStats {
            nodes,
            edges: total / 2,
            avg_connections: if nodes > 0 {
                total as f64 / nodes as f64
            } else {
                0.0
            },
        }
    }

    pub fn node(&self, keyword: &str) -> Option<&KeywordNode> {
        self.nodes.get(keyword)
    }

    /// Co-occurrence count between two keywords (0 when unconnected).
    pub fn edge_weight(&self, a: &str, b: &str) -> u64 {
        self.nodes
            .get(a)
            .and_then(|node| node.connections.get(b))
            .copied()
            .unwrap_or(0)
    }

    /// Ids of entries currently indexed under `keyword`.
    pub fn entry_ids(&self, keyword: &str) -> Vec<&str> {
        let mut ids: Vec<&str> = self
            .inverted_index
            .get(keyword)
            .map(|ids| ids.iter().map(String::as_str).collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn ensure_node(&mut self, keyword: &str) {
        if !self.nodes.contains_key(keyword) {
            self.nodes
                .insert(keyword.to_string(), KeywordNode::new(keyword));
        }
    }

    fn index_entry(&mut self, keyword: &str, entry_id: &str) {
        self.inverted_index
            .entry(keyword.to_string())
            .or_default()
            .insert(entry_id.to_string());
    }

    fn add_pairs(&mut self, keywords: &[&str]) {
        for (i, a) in keywords.iter().enumerate() {
            for b in &keywords[i + 1..] {
                self.add_edge(a, b);
            }
        }
    }
}

/// `ln(total / df) + 1`, or 1 when either count is zero.
fn idf_weight(total_docs: usize, df: usize) -> f64 {
    if total_docs == 0 || df == 0 {
        return 1.0;
    }
    (total_docs as f64 / df as f64).ln() + 1.0
}

/// Neighbors by descending edge weight, ties by keyword, capped at `limit`.
fn ranked_neighbors(node: &KeywordNode, limit: usize) -> Vec<(&str, u64)> {
    let mut neighbors: Vec<(&str, u64)> = node
        .connections
        .iter()
        .map(|(kw, w)| (kw.as_str(), *w))
        .collect();
    neighbors.sort_by(|a, b| match b.1.cmp(&a.1) {
        Ordering::Equal => a.0.cmp(b.0),
        other => other,
    });
    neighbors.truncate(limit);
    neighbors
}
