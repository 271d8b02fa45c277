//! Property-based tests for the keyword graph using proptest.
//!
//! These tests check the structural guarantees the rest of the crate relies on:
//!
//! - Edge counts equal the number of entries sharing both keywords, whatever
//!   the insertion order or path (rebuild vs incremental)
//! - Connections stay symmetric
//! - Node weights follow `ln(N / df) + 1` after a rebuild
//! - Removing an entry never changes nodes or edges
//! - Export and restore preserve the graph
//! - Query expansion never loses an exact match

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::graph::{GraphSearchOptions, KeywordGraph};
    use crate::types::{EntryDraft, MemoryEntry};

    const VOCABULARY: &[&str] = &[
        "rust", "sqlite", "graph", "memory", "sync", "webdav", "notes", "search",
    ];

    // Keyword lists drawn from a small vocabulary so that entries overlap
    fn keyword_list() -> impl Strategy<Value = Vec<String>> {
        prop::collection::vec(prop::sample::select(VOCABULARY), 1..6)
            .prop_map(|kws| kws.into_iter().map(str::to_string).collect())
    }

    fn entries() -> impl Strategy<Value = Vec<MemoryEntry>> {
        prop::collection::vec(keyword_list(), 0..20).prop_map(|lists| {
            lists
                .into_iter()
                .enumerate()
                .map(|(i, kws)| {
                    let mut entry = EntryDraft::new(format!("entry {}", i), kws).into_entry(0);
                    entry.id = format!("e{}", i);
                    entry
                })
                .collect()
        })
    }

    fn shares_both(entry: &MemoryEntry, a: &str, b: &str) -> bool {
        entry.keywords.iter().any(|k| k == a) && entry.keywords.iter().any(|k| k == b)
    }

    // =========================================================================
    // Edge Properties
    // =========================================================================

    proptest! {
        /// Rebuild and incremental insertion (in reverse) agree on every edge,
        /// and each edge counts the entries holding both endpoints.
        #[test]
        fn edges_count_shared_entries(entries in entries()) {
            let mut rebuilt = KeywordGraph::new();
            rebuilt.build_from_entries(&entries);

            let mut incremental = KeywordGraph::new();
            for entry in entries.iter().rev() {
                incremental.add_entry(entry);
            }

            for a in VOCABULARY {
                for b in VOCABULARY {
                    if a == b {
                        continue;
                    }
                    let expected = entries.iter().filter(|e| shares_both(e, a, b)).count() as u64;
                    prop_assert_eq!(rebuilt.edge_weight(a, b), expected);
                    prop_assert_eq!(incremental.edge_weight(a, b), expected);
                }
            }
        }

        /// Connections are symmetric.
        #[test]
        fn connections_are_symmetric(entries in entries()) {
            let mut graph = KeywordGraph::new();
            for entry in &entries {
                graph.add_entry(entry);
            }

            for (keyword, node) in graph.export() {
                for (neighbor, count) in &node.connections {
                    prop_assert_eq!(graph.edge_weight(neighbor, &keyword), *count);
                }
            }
        }
    }

    // =========================================================================
    // Weight Properties
    // =========================================================================

    proptest! {
        /// Every node weight equals ln(N / df) + 1 after a rebuild.
        #[test]
        fn weights_follow_idf(entries in entries()) {
            let mut graph = KeywordGraph::new();
            graph.build_from_entries(&entries);

            let total = entries.len() as f64;
            for (keyword, node) in graph.export() {
                let df = entries
                    .iter()
                    .filter(|e| e.keywords.iter().any(|k| *k == keyword))
                    .count() as f64;
                let expected = (total / df).ln() + 1.0;
                prop_assert!(
                    (node.weight - expected).abs() < 1e-12,
                    "weight of {} is {}, expected {}",
                    keyword, node.weight, expected
                );
                prop_assert!(node.weight >= 1.0);
            }
        }

        /// Removing entries leaves nodes, weights and edges untouched.
        #[test]
        fn remove_entry_is_structurally_neutral(entries in entries()) {
            let mut graph = KeywordGraph::new();
            graph.build_from_entries(&entries);
            let before = graph.export();

            for entry in &entries {
                graph.remove_entry(entry);
            }

            prop_assert_eq!(graph.export(), before);
        }

        /// Exporting and restoring yields identical stats.
        #[test]
        fn export_restore_preserves_stats(entries in entries()) {
            let mut graph = KeywordGraph::new();
            graph.build_from_entries(&entries);

            let restored = KeywordGraph::from_nodes(graph.export());
            prop_assert_eq!(restored.stats(), graph.stats());
        }
    }

    // =========================================================================
    // Query Properties
    // =========================================================================

    proptest! {
        /// Seeds present in the graph always score exactly 1.0.
        #[test]
        fn seeds_score_one(
            entries in entries(),
            seeds in keyword_list(),
            depth in 0usize..4,
            fanout in 0usize..5
        ) {
            let mut graph = KeywordGraph::new();
            graph.build_from_entries(&entries);

            let scores = graph.expand_query(&seeds, depth, fanout);
            for seed in &seeds {
                if graph.node(seed).is_some() {
                    prop_assert_eq!(scores.get(seed).copied(), Some(1.0));
                } else {
                    prop_assert!(!scores.contains_key(seed));
                }
            }
        }

        /// Expansion never drops an exact match and never lowers its score.
        #[test]
        fn expansion_keeps_exact_matches(
            entries in entries(),
            query in keyword_list(),
            min_score in 0.0f64..1.0
        ) {
            let mut graph = KeywordGraph::new();
            graph.build_from_entries(&entries);

            let base = GraphSearchOptions::default()
                .with_min_score(min_score)
                .with_max_results(usize::MAX);
            let exact = graph.search(
                &query,
                &entries,
                &GraphSearchOptions { use_expansion: false, ..base.clone() },
            );
            let expanded = graph.search(&query, &entries, &base);

            for hit in &exact {
                let found = expanded.iter().find(|r| r.entry.id == hit.entry.id);
                prop_assert!(found.is_some(), "exact match {} was dropped", hit.entry.id);
                if let Some(found) = found {
                    prop_assert!(found.score >= hit.score);
                }
            }
        }
    }
}
