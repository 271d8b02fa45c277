//! Query tokenization for search.

use std::collections::HashSet;

use regex::Regex;

use crate::error::{Error, Result};

/// Whitespace, ASCII punctuation, and CJK punctuation. `.`, `-`, `_`, `+`, `#`
/// and `/` stay inside tokens so `c++`, `node.js` and `ci/cd` survive.
pub const DEFAULT_SEPARATORS: &str =
    r#"[\s,;:!?"'()\[\]{}<>，。；：！？、“”‘’（）【】《》]+"#;

/// Splits a free-text query into lower-cased keyword tokens.
#[derive(Debug, Clone)]
pub struct QueryTokenizer {
    separators: Regex,
}

impl QueryTokenizer {
    /// Build a tokenizer splitting on `pattern`, or on [`DEFAULT_SEPARATORS`].
    pub fn new(pattern: Option<&str>) -> Result<Self> {
        let pattern = pattern.unwrap_or(DEFAULT_SEPARATORS);
        let separators = Regex::new(pattern)
            .map_err(|e| Error::Config(format!("invalid token pattern {:?}: {}", pattern, e)))?;
        Ok(Self { separators })
    }

    /// Distinct non-empty tokens, in query order.
    pub fn tokenize(&self, query: &str) -> Vec<String> {
        let lowered = query.to_lowercase();
        let mut seen = HashSet::new();
        self.separators
            .split(&lowered)
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .filter(|token| seen.insert(*token))
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenize(query: &str) -> Vec<String> {
        QueryTokenizer::new(None).unwrap().tokenize(query)
    }

    #[test]
    fn test_splits_on_whitespace_and_punctuation() {
        assert_eq!(
            tokenize("  Rust, SQLite; (WAL)  mode! "),
            vec!["rust", "sqlite", "wal", "mode"]
        );
    }

    #[test]
    fn test_keeps_technical_tokens_whole() {
        assert_eq!(
            tokenize("c++ node.js ci/cd snake_case c#"),
            vec!["c++", "node.js", "ci/cd", "snake_case", "c#"]
        );
    }

    #[test]
    fn test_cjk_punctuation() {
        assert_eq!(tokenize("图谱，检索。记忆"), vec!["图谱", "检索", "记忆"]);
    }

    #[test]
    fn test_dedupes_and_handles_empty() {
        assert_eq!(tokenize("graph Graph GRAPH"), vec!["graph"]);
        assert!(tokenize("  ,;  ").is_empty());
        assert!(tokenize("").is_empty());
    }

    #[test]
    fn test_custom_pattern() {
        let tokenizer = QueryTokenizer::new(Some(r"\|")).unwrap();
        assert_eq!(tokenizer.tokenize("a b|C"), vec!["a b", "c"]);
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        assert!(matches!(QueryTokenizer::new(Some("[")), Err(Error::Config(_))));
    }
}
