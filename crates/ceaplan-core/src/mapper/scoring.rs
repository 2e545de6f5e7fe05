//! Candidate scoring and ranking.
//!
//! score = tag_weight × |domains ∩ tags|
//!       + preference_bonus（algorithm か objective がタグに含まれる）
//!       + coverage_bonus（Workflow で、どの Script 候補の一致タグも包含する）
//!
//! タグ比較は大文字小文字を区別しない（カタログ側のタグは `Cooling` のように書かれることがある）。
//!
//! 並び順: score 降順 → Workflow 優先 → id 昇順。同じ入力とカタログなら常に同じ結果。

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::domain::{CatalogEntry, EntryKind, Intent};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub tag_weight: u32,
    pub preference_bonus: u32,
    pub coverage_bonus: u32,
    /// A candidate must score strictly above this to be selected.
    pub min_score: u32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            tag_weight: 10,
            preference_bonus: 5,
            coverage_bonus: 3,
            min_score: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub entry: CatalogEntry,
    /// Intent domain keywords found in the entry's tags.
    pub matched: BTreeSet<String>,
    pub preference_hit: bool,
    pub score: u32,
}

/// Score every candidate and sort best-first.
pub fn rank(candidates: Vec<CatalogEntry>, intent: &Intent, config: &ScoringConfig) -> Vec<ScoredCandidate> {
    let domains = lowercased(intent.domain_set().iter());

    let mut scored: Vec<ScoredCandidate> = candidates
        .into_iter()
        .map(|entry| {
            let entry_tags = lowercased(entry.tags().iter());
            let matched: BTreeSet<String> = domains.intersection(&entry_tags).cloned().collect();
            let preference_hit = intent
                .algorithm
                .as_ref()
                .is_some_and(|a| entry_tags.contains(&a.to_lowercase()))
                || intent
                    .objectives
                    .iter()
                    .any(|o| entry_tags.contains(&o.to_lowercase()));
            let score = config.tag_weight * matched.len() as u32
                + if preference_hit { config.preference_bonus } else { 0 };
            ScoredCandidate {
                entry,
                matched,
                preference_hit,
                score,
            }
        })
        .collect();

    let script_matches: Vec<BTreeSet<String>> = scored
        .iter()
        .filter(|c| c.entry.kind() == EntryKind::Script)
        .map(|c| c.matched.clone())
        .collect();

    for candidate in scored.iter_mut() {
        if candidate.entry.kind() == EntryKind::Workflow
            && !candidate.matched.is_empty()
            && script_matches.iter().all(|s| candidate.matched.is_superset(s))
        {
            candidate.score += config.coverage_bonus;
        }
    }

    scored.sort_by(compare);
    scored
}

fn lowercased<'a>(words: impl Iterator<Item = &'a String>) -> BTreeSet<String> {
    words.map(|w| w.to_lowercase()).collect()
}

/// Best-first ordering.
pub fn compare(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    b.score
        .cmp(&a.score)
        .then_with(|| a.entry.kind().cmp(&b.entry.kind()))
        .then_with(|| a.entry.id().cmp(b.entry.id()))
}
