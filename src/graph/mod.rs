//! Keyword co-occurrence graph.
//!
//! Every stored entry contributes an edge between each pair of its distinct
//! keywords, so keywords that are often used together become strongly
//! connected. Queries are expanded breadth-first through those connections,
//! which lets a search find entries that never mention the query words.
//!
//! ## Example
//!
//! ```rust,ignore
//! use keyword_memory::graph::{GraphSearchOptions, KeywordGraph};
//!
//! let mut graph = KeywordGraph::new();
//! graph.build_from_entries(&entries);
//!
//! let scores = graph.expand_query(&["sqlite".to_string()], 2, 10);
//! let hits = graph.search(&["sqlite".to_string()], &entries, &GraphSearchOptions::default());
//! ```

mod keyword_graph;
mod proptest;

pub use keyword_graph::{GraphSearchOptions, GraphStats, KeywordGraph, RelatedKeyword, TopKeyword};
