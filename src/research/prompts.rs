//! Prompt shapes for each generator call in the pipeline.

use crate::llm::{PromptContext, PromptKind};
use crate::research::types::{Critique, Draft, ResearchContext};
use crate::retrieval::RawEvidence;
use serde::de::DeserializeOwned;
use std::fmt::Write;

const RESEARCHER_ROLE: &str = "You are a meticulous research assistant. You write factual, \
well-structured reports and cite every claim with the bracketed number of the evidence \
it comes from, e.g. [3].";

/// Translate a non-English query into a search-friendly English one.
pub fn translate(query: &str) -> PromptContext {
    PromptContext::new(
        PromptKind::Translate,
        "You detect the language of search queries and translate them for English web search.",
        format!(
            r#"Analyze this query and respond in JSON only:
Query: {query}

{{
  "language": "detected language name",
  "is_english": false,
  "english_translation": "the query translated to English",
  "search_optimized_query": "short, keyword-focused English query for web search"
}}"#
        ),
    )
}

/// Decompose the root query into at most `max` sub-questions, optionally
/// with a first round of search hits for the query as orientation.
pub fn plan(query: &str, max: usize, initial_results: &[RawEvidence]) -> PromptContext {
    let mut background = String::new();
    if !initial_results.is_empty() {
        background.push_str("Initial search results for the question:\n");
        for item in initial_results {
            let _ = writeln!(background, "- ({}) {}", item.source_id, item.text.trim());
        }
        background.push('\n');
    }

    PromptContext::new(
        PromptKind::Plan,
        "You are a research planner. You break a research question into focused, \
         independently searchable sub-questions.",
        format!(
            r#"{background}Write at most {max} search queries that together cover: "{query}"

Each query must be self-contained and answerable by a web search.
Respond with a JSON array of strings and nothing else, for example:
["first query", "second query"]"#
        ),
    )
}

/// Initial report from the aggregated evidence.
pub fn draft(query: &str, context: &ResearchContext) -> PromptContext {
    PromptContext::new(
        PromptKind::Draft,
        RESEARCHER_ROLE,
        format!(
            "Research question: {query}\n\nEvidence:\n{}\n\
             Write a detailed report in Markdown that answers the question using only the \
             evidence above. Cite sources inline with their bracketed numbers.",
            render_evidence(context)
        ),
    )
}

/// Ask the reviewer for a verdict on `draft`.
pub fn review(query: &str, draft: &Draft, context: &ResearchContext) -> PromptContext {
    PromptContext::new(
        PromptKind::Review,
        "You are a strict reviewer of research reports. You check that the report answers \
         the question, is supported by the evidence, and cites its sources.",
        format!(
            r#"Research question: {query}

Evidence:
{}
Report (version {}):
{}

Respond in JSON only:
{{"verdict": "accept" | "revise", "issues": ["actionable issue", ...]}}
Use "accept" with an empty issues list if the report needs no changes."#,
            render_evidence(context),
            draft.version,
            draft.body
        ),
    )
}

/// Rewrite `draft` to address every issue in `critique`.
pub fn revise(
    query: &str,
    draft: &Draft,
    critique: &Critique,
    context: &ResearchContext,
) -> PromptContext {
    let mut issues = String::new();
    for (i, issue) in critique.issues.iter().enumerate() {
        let _ = writeln!(issues, "{}. {}", i + 1, issue);
    }

    PromptContext::new(
        PromptKind::Revise,
        RESEARCHER_ROLE,
        format!(
            "Research question: {query}\n\nEvidence:\n{}\nCurrent report:\n{}\n\n\
             Reviewer issues:\n{issues}\n\
             Rewrite the full report so that every issue is resolved. Keep the citations \
             consistent with the evidence numbers. Respond with the report only.",
            render_evidence(context),
            draft.body
        ),
    )
}

/// Numbered evidence list; the numbers are the citation keys.
pub fn render_evidence(context: &ResearchContext) -> String {
    let mut out = String::new();
    for (i, item) in context.items.iter().enumerate() {
        let _ = writeln!(out, "[{}] ({}) {}", i + 1, item.source_id, item.text.trim());
    }
    out
}

/// Every JSON value of type `T` that starts at an `open` character of the
/// reply, in reply order. Models wrap JSON in prose and code fences, and the
/// prose may carry brackets of its own, so each candidate position is tried
/// and anything after a complete value is ignored.
pub(crate) fn json_values<'a, T: DeserializeOwned + 'a>(
    reply: &'a str,
    open: char,
) -> impl Iterator<Item = T> + 'a {
    reply
        .match_indices(open)
        .filter_map(move |(start, _)| {
            serde_json::Deserializer::from_str(&reply[start..])
                .into_iter::<T>()
                .next()
                .and_then(|value| value.ok())
        })
}
