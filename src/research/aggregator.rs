//! Evidence aggregation.
//!
//! Pure merge of fan-out results into a [`ResearchContext`]. Branches are
//! visited in sub-question order and items in arrival order, so the first
//! copy of a duplicate (same source, same normalized text) that survives is
//! always the one from the lowest sub-question index.

use crate::research::fanout::FetchResults;
use crate::research::types::{EvidenceItem, ResearchContext};
use std::collections::HashSet;

pub fn aggregate(results: &FetchResults) -> ResearchContext {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut items: Vec<EvidenceItem> = Vec::new();

    for branch in results.values().filter_map(|r| r.as_ref().ok()) {
        for item in branch {
            let text = normalize_text(&item.text);
            if text.is_empty() {
                continue;
            }
            let key = (item.source_id.trim().to_string(), text);
            if seen.insert(key) {
                items.push(item.clone());
            }
        }
    }

    ResearchContext { items }
}

/// Lowercase with runs of whitespace collapsed to one space.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}
