//! Sub-query planner
//!
//! Decomposes the root query into an ordered list of [`SubQuestion`]s with a
//! single generator call, optionally informed by a first search for the
//! query itself. Planning never fails a run: if the generator (and the
//! fallback model, when one is configured) errors out or produces nothing
//! usable, the query itself becomes the only sub-question.

use crate::llm::{LLMClient, PromptContext};
use crate::research::prompts::{self, json_values};
use crate::research::stage::{cancellable, CallError, StageContext};
use crate::research::types::{Stage, StageError, SubQuestion};
use crate::retrieval::{EvidenceFetcher, RawEvidence};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;

/// Search hits shown to the planner
const INITIAL_RESULTS_SHOWN: usize = 5;

pub struct SubQueryPlanner {
    llm: Arc<dyn LLMClient>,
    fallback: Option<Arc<dyn LLMClient>>,
    search: Option<Arc<dyn EvidenceFetcher>>,
}

#[derive(Debug, Deserialize)]
struct TranslationReply {
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    is_english: Option<bool>,
    #[serde(default)]
    english_translation: Option<String>,
    #[serde(default)]
    search_optimized_query: Option<String>,
}

impl SubQueryPlanner {
    pub fn new(llm: Arc<dyn LLMClient>) -> Self {
        Self {
            llm,
            fallback: None,
            search: None,
        }
    }

    /// Generator asked once `llm` has used up its attempts.
    pub fn with_fallback(mut self, fallback: Option<Arc<dyn LLMClient>>) -> Self {
        self.fallback = fallback;
        self
    }

    /// Fetcher for the initial search of the query, run when the task's
    /// `search_before_planning` is set.
    pub fn with_search(mut self, fetcher: Arc<dyn EvidenceFetcher>) -> Self {
        self.search = Some(fetcher);
        self
    }

    /// Plan between 1 and `max_sub_questions` sub-questions for `root_query`.
    ///
    /// Only cancellation is reported as an error.
    pub async fn plan(
        &self,
        root_query: &str,
        max_sub_questions: usize,
        ctx: &StageContext,
    ) -> Result<Vec<SubQuestion>, StageError> {
        let max_sub_questions = max_sub_questions.max(1);
        let query = self.search_query(root_query, ctx).await?;

        let initial_results = self.initial_search(&query, ctx).await?;

        let prompt = prompts::plan(&query, max_sub_questions, &initial_results);
        let planned = match self.generate_plan(&prompt, ctx).await? {
            Some(reply) => parse_sub_questions(&reply, max_sub_questions),
            None => Vec::new(),
        };

        let texts = if planned.is_empty() {
            ctx.events.warning(
                Stage::Planning,
                "Planner produced no sub-questions; researching the query directly",
            );
            vec![query]
        } else {
            planned
        };

        Ok(texts
            .into_iter()
            .enumerate()
            .map(|(index, text)| SubQuestion { index, text })
            .collect())
    }

    /// The planner reply from the primary generator, or from the fallback
    /// model once the primary gives up. `None` when every generator gave up.
    async fn generate_plan(
        &self,
        prompt: &PromptContext,
        ctx: &StageContext,
    ) -> Result<Option<String>, StageError> {
        for llm in std::iter::once(&self.llm).chain(self.fallback.as_ref()) {
            match ctx.generate(&**llm, prompt).await {
                Ok(reply) => return Ok(Some(reply)),
                Err(CallError::Cancelled) => return Err(StageError::Cancelled),
                Err(CallError::Exhausted { last_error, .. }) => {
                    tracing::warn!(
                        task_id = %ctx.task().id,
                        model = llm.model_name(),
                        error = %last_error,
                        "Planner gave up"
                    );
                }
            }
        }
        Ok(None)
    }

    /// Search hits for the query itself. A failed or timed out search only
    /// means the planner works without them.
    async fn initial_search(
        &self,
        query: &str,
        ctx: &StageContext,
    ) -> Result<Vec<RawEvidence>, StageError> {
        let fetcher = match &self.search {
            Some(fetcher) if ctx.config().search_before_planning => fetcher,
            _ => return Ok(Vec::new()),
        };

        let timeout = ctx.config().per_call_timeout;
        let call = tokio::time::timeout(timeout, fetcher.fetch(query, timeout));
        match cancellable(&ctx.cancellation_token(), call).await {
            None => Err(StageError::Cancelled),
            Some(Ok(Ok(mut items))) => {
                tracing::debug!(
                    task_id = %ctx.task().id,
                    hits = items.len(),
                    "Initial search done"
                );
                items.truncate(INITIAL_RESULTS_SHOWN);
                Ok(items)
            }
            Some(Ok(Err(e))) => {
                tracing::warn!(task_id = %ctx.task().id, error = %e, "Initial search failed");
                Ok(Vec::new())
            }
            Some(Err(_)) => {
                tracing::warn!(task_id = %ctx.task().id, ?timeout, "Initial search timed out");
                Ok(Vec::new())
            }
        }
    }

    /// The query the planner and fetchers work from: the root query, or its
    /// English translation when translation is enabled and the query is not
    /// plain ASCII.
    async fn search_query(
        &self,
        root_query: &str,
        ctx: &StageContext,
    ) -> Result<String, StageError> {
        let root_query = root_query.trim();
        if !ctx.config().translate_queries || root_query.is_ascii() {
            return Ok(root_query.to_string());
        }

        match ctx.generate(&*self.llm, &prompts::translate(root_query)).await {
            Ok(reply) => match parse_translation(&reply) {
                Some((language, translated)) => {
                    tracing::info!(
                        task_id = %ctx.task().id,
                        %language,
                        %translated,
                        "Translated query for search"
                    );
                    Ok(translated)
                }
                None => Ok(root_query.to_string()),
            },
            Err(CallError::Cancelled) => Err(StageError::Cancelled),
            Err(CallError::Exhausted { last_error, .. }) => {
                ctx.events.warning(
                    Stage::Planning,
                    format!("Query translation failed ({last_error}); using the original query"),
                );
                Ok(root_query.to_string())
            }
        }
    }
}

/// Parse planner output into at most `max` distinct sub-question strings.
///
/// Accepts a JSON array (of strings, or of objects with a `query` or
/// `question` field) anywhere in the reply, and otherwise falls back to one
/// sub-question per numbered or bulleted line.
pub fn parse_sub_questions(reply: &str, max: usize) -> Vec<String> {
    let candidates = parse_json_list(reply).unwrap_or_else(|| parse_lines(reply));

    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .map(|q| q.trim().trim_matches('"').trim().to_string())
        .filter(|q| !q.is_empty())
        .filter(|q| seen.insert(q.to_lowercase()))
        .take(max)
        .collect()
}

/// The first JSON array in the reply that yields at least one query. Arrays
/// of citation numbers and the like are skipped.
fn parse_json_list(reply: &str) -> Option<Vec<String>> {
    json_values::<Vec<serde_json::Value>>(reply, '[')
        .map(|values| {
            values
                .into_iter()
                .filter_map(|v| match v {
                    serde_json::Value::String(s) => Some(s),
                    serde_json::Value::Object(map) => map
                        .get("query")
                        .or_else(|| map.get("question"))
                        .and_then(|q| q.as_str())
                        .map(str::to_string),
                    _ => None,
                })
                .collect::<Vec<_>>()
        })
        .find(|queries| !queries.is_empty())
}

fn parse_lines(reply: &str) -> Vec<String> {
    reply
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("```"))
        .filter(|line| !line.ends_with(':'))
        .map(|line| {
            line.trim_start_matches(|c: char| {
                c.is_ascii_digit() || matches!(c, '.' | ')' | '-' | '*' | '•')
            })
            .trim()
            .to_string()
        })
        .collect()
}

/// `(language, english query)` if the reply says the query was not English.
fn parse_translation(reply: &str) -> Option<(String, String)> {
    let parsed = json_values::<TranslationReply>(reply, '{').find(|r| {
        r.is_english.is_some()
            || r.search_optimized_query.is_some()
            || r.english_translation.is_some()
    })?;
    if parsed.is_english.unwrap_or(true) {
        return None;
    }
    let translated = parsed
        .search_optimized_query
        .or(parsed.english_translation)
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())?;
    Some((
        parsed.language.unwrap_or_else(|| "unknown".to_string()),
        translated,
    ))
}
