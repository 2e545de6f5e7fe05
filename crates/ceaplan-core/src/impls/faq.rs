//! FAQ matching by content-word overlap.
//!
//! クエリと FAQ（質問文 + keywords）を単語に分け、ストップワードを除いた
//! 共通語の数が最大のエントリを選ぶ。同点はカタログ順。

use std::collections::BTreeSet;

use crate::domain::FaqEntry;

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "to", "of", "for", "with", "in", "on", "at", "what", "how",
    "do", "does", "can", "i", "my", "me", "you", "it", "this", "which", "and", "or",
];

/// Lowercased content words of `text`.
pub fn content_words(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .filter(|w| !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

/// Precomputed terms of one FAQ entry.
#[derive(Debug, Clone)]
pub struct FaqTerms {
    terms: BTreeSet<String>,
}

impl FaqTerms {
    pub fn of(entry: &FaqEntry) -> Self {
        let mut terms = content_words(&entry.question);
        for keyword in &entry.keywords {
            terms.extend(content_words(keyword));
        }
        Self { terms }
    }

    pub fn overlap(&self, query: &BTreeSet<String>) -> usize {
        self.terms.intersection(query).count()
    }
}

/// Index of the best-matching entry, if any shares at least one content word.
pub fn best_match(terms: &[FaqTerms], query: &str) -> Option<usize> {
    let words = content_words(query);
    if words.is_empty() {
        return None;
    }

    let mut best: Option<(usize, usize)> = None;
    for (idx, entry) in terms.iter().enumerate() {
        let overlap = entry.overlap(&words);
        if overlap == 0 {
            continue;
        }
        // 同点は先勝ち
        if best.is_none_or(|(_, top)| overlap > top) {
            best = Some((idx, overlap));
        }
    }
    best.map(|(idx, _)| idx)
}
