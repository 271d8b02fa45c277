//! Keyword extraction for imported files.

use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Derives a keyword set from a file's content and name.
pub trait KeywordExtractor: Send + Sync {
    fn extract(&self, content: &str, filename: &str) -> Vec<String>;
}

impl<F> KeywordExtractor for F
where
    F: Fn(&str, &str) -> Vec<String> + Send + Sync,
{
    fn extract(&self, content: &str, filename: &str) -> Vec<String> {
        self(content, filename)
    }
}

/// Filename tokens, the most frequent body words, and markdown headings.
#[derive(Debug, Clone)]
pub struct DefaultKeywordExtractor {
    /// Upper bound on the merged keyword list
    pub max_keywords: usize,
    /// Most frequent body words kept
    pub top_terms: usize,
    /// Headings considered, in document order
    pub max_headings: usize,
}

impl Default for DefaultKeywordExtractor {
    fn default() -> Self {
        Self {
            max_keywords: 15,
            top_terms: 10,
            max_headings: 5,
        }
    }
}

impl DefaultKeywordExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    fn filename_terms(filename: &str) -> Vec<String> {
        let stem = Path::new(filename)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        stem.split(|c: char| c == '-' || c == '_' || c.is_whitespace())
            .filter(|w| w.chars().count() > 2)
            .map(str::to_lowercase)
            .collect()
    }

    fn frequent_terms(&self, content: &str) -> Vec<String> {
        let cleaned: String = content
            .to_lowercase()
            .chars()
            .map(|c| {
                if is_term_char(c) || c.is_whitespace() {
                    c
                } else {
                    ' '
                }
            })
            .collect();

        // word -> (count, first position)
        let mut freq: HashMap<&str, (usize, usize)> = HashMap::new();
        for (pos, word) in cleaned.split_whitespace().enumerate() {
            let len = word.chars().count();
            if len <= 2 || len >= 20 {
                continue;
            }
            freq.entry(word).or_insert((0, pos)).0 += 1;
        }

        let mut ranked: Vec<(&str, (usize, usize))> = freq.into_iter().collect();
        ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));
        ranked
            .into_iter()
            .take(self.top_terms)
            .map(|(word, _)| word.to_string())
            .collect()
    }

    fn headings(&self, content: &str) -> Vec<String> {
        content
            .lines()
            .filter_map(heading_text)
            .take(self.max_headings)
            .filter(|text| {
                let len = text.chars().count();
                len > 2 && len < 50
            })
            .map(str::to_lowercase)
            .collect()
    }
}

impl KeywordExtractor for DefaultKeywordExtractor {
    fn extract(&self, content: &str, filename: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        Self::filename_terms(filename)
            .into_iter()
            .chain(self.frequent_terms(content))
            .chain(self.headings(content))
            .filter(|kw| seen.insert(kw.clone()))
            .take(self.max_keywords)
            .collect()
    }
}

/// ASCII word characters and CJK unified ideographs (U+4E00..=U+9FA5).
fn is_term_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || ('\u{4e00}'..='\u{9fa5}').contains(&c)
}

/// Text of an ATX heading line (`## Title`), if the line is one.
fn heading_text(line: &str) -> Option<&str> {
    let rest = line.trim_start_matches('#');
    if rest.len() == line.len() || !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let text = rest.trim();
    (!text.is_empty()).then_some(text)
}
