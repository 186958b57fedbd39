//! Mock collaborators for testing.
//!
//! Scripted generator and fetcher implementations shared by the
//! integration tests, so pipeline behavior can be exercised without a
//! model server or network access.

use deepcite::llm::{LLMClient, PromptContext, PromptKind};
use deepcite::research::{ControllerOptions, MarkdownRenderer, ResearchConfig, ResearchController};
use deepcite::retrieval::{EvidenceFetcher, FetchError, RawEvidence};
use deepcite::types::{AppError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// Mock text generator scripted per prompt kind.
///
/// Each kind has a queue of replies; the last reply of a queue repeats once
/// the queue is drained. Kinds without a script get a generic report body.
///
/// ```ignore
/// let llm = MockLLMClient::new()
///     .with_reply(PromptKind::Plan, r#"["a", "b"]"#)
///     .with_replies(PromptKind::Review, [REVISE, ACCEPT])
///     .failing(PromptKind::Draft, 1);
/// ```
#[derive(Default)]
pub struct MockLLMClient {
    replies: Mutex<HashMap<PromptKind, VecDeque<String>>>,
    failures: Mutex<HashMap<PromptKind, u32>>,
    calls: Mutex<HashMap<PromptKind, u32>>,
    prompts: Mutex<Vec<PromptContext>>,
    echo: Mutex<Vec<PromptKind>>,
    panics: Mutex<Vec<PromptKind>>,
    delay: Option<Duration>,
}

pub const ACCEPT: &str = r#"{"verdict": "accept", "issues": []}"#;
pub const REVISE: &str = r#"{"verdict": "revise", "issues": ["add more citations"]}"#;

impl MockLLMClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Planner returns `questions`, reviewer accepts, drafts are fixed text.
    pub fn planning(questions: &[&str]) -> Self {
        let plan = serde_json::to_string(questions).unwrap_or_default();
        Self::new()
            .with_reply(PromptKind::Plan, &plan)
            .with_reply(PromptKind::Review, ACCEPT)
    }

    pub fn with_reply(self, kind: PromptKind, reply: &str) -> Self {
        self.with_replies(kind, [reply])
    }

    pub fn with_replies<'a>(
        self,
        kind: PromptKind,
        replies: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        self.replies
            .lock()
            .insert(kind, replies.into_iter().map(str::to_string).collect());
        self
    }

    /// The first `times` calls of `kind` fail.
    pub fn failing(self, kind: PromptKind, times: u32) -> Self {
        self.failures.lock().insert(kind, times);
        self
    }

    /// Reply to `kind` with the prompt's user text, so the output reflects
    /// exactly what the stage was given.
    pub fn echoing(self, kind: PromptKind) -> Self {
        self.echo.lock().push(kind);
        self
    }

    /// Every call of `kind` panics.
    pub fn panicking(self, kind: PromptKind) -> Self {
        self.panics.lock().push(kind);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self, kind: PromptKind) -> u32 {
        self.calls.lock().get(&kind).copied().unwrap_or(0)
    }

    /// User text of every `kind` prompt received, in call order.
    pub fn prompts(&self, kind: PromptKind) -> Vec<String> {
        self.prompts
            .lock()
            .iter()
            .filter(|p| p.kind == kind)
            .map(|p| p.user.clone())
            .collect()
    }

    fn next_reply(&self, context: &PromptContext) -> Result<String> {
        *self.calls.lock().entry(context.kind).or_insert(0) += 1;
        self.prompts.lock().push(context.clone());

        if let Some(remaining) = self.failures.lock().get_mut(&context.kind) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(AppError::LLM(format!("mock {} failure", context.kind.as_str())));
            }
        }

        let panics = self.panics.lock().contains(&context.kind);
        if panics {
            panic!("mock {} panic", context.kind.as_str());
        }

        if self.echo.lock().contains(&context.kind) {
            return Ok(context.user.clone());
        }

        let mut replies = self.replies.lock();
        let reply = match replies.get_mut(&context.kind) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };

        Ok(reply.unwrap_or_else(|| match context.kind {
            PromptKind::Revise => "Revised report [1].".to_string(),
            _ => "Report body citing [1].".to_string(),
        }))
    }
}

#[async_trait]
impl LLMClient for MockLLMClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.generate_structured(&PromptContext::new(PromptKind::Draft, "", prompt))
            .await
    }

    async fn generate_with_system(&self, system: &str, prompt: &str) -> Result<String> {
        self.generate_structured(&PromptContext::new(PromptKind::Draft, system, prompt))
            .await
    }

    async fn generate_structured(&self, context: &PromptContext) -> Result<String> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.next_reply(context)
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

/// Scripted per-query behavior for [`MockFetcher`].
#[derive(Clone)]
pub enum FetchScript {
    Items(Vec<RawEvidence>),
    Fail(String),
    /// Sleep, then return the items
    Delayed(Duration, Vec<RawEvidence>),
}

/// Mock evidence fetcher keyed by query text.
///
/// Queries without a script return one snippet derived from the query.
#[derive(Default)]
pub struct MockFetcher {
    scripts: HashMap<String, FetchScript>,
    calls: Mutex<Vec<String>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, query: &str, script: FetchScript) -> Self {
        self.scripts.insert(query.to_string(), script);
        self
    }

    pub fn items(self, query: &str, items: &[(&str, &str)]) -> Self {
        self.with(query, FetchScript::Items(evidence(items)))
    }

    pub fn fail(self, query: &str) -> Self {
        self.with(query, FetchScript::Fail(format!("no results for {query}")))
    }

    pub fn delayed(self, query: &str, delay: Duration, items: &[(&str, &str)]) -> Self {
        self.with(query, FetchScript::Delayed(delay, evidence(items)))
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

/// `(source_id, text)` pairs into evidence.
pub fn evidence(items: &[(&str, &str)]) -> Vec<RawEvidence> {
    items
        .iter()
        .map(|(source, text)| RawEvidence::new(*text, *source))
        .collect()
}

#[async_trait]
impl EvidenceFetcher for MockFetcher {
    async fn fetch(
        &self,
        query: &str,
        _timeout: Duration,
    ) -> std::result::Result<Vec<RawEvidence>, FetchError> {
        self.calls.lock().push(query.to_string());

        match self.scripts.get(query).cloned() {
            Some(FetchScript::Items(items)) => Ok(items),
            Some(FetchScript::Fail(msg)) => Err(FetchError::Failed(msg)),
            Some(FetchScript::Delayed(delay, items)) => {
                tokio::time::sleep(delay).await;
                Ok(items)
            }
            None => Ok(vec![RawEvidence::new(
                format!("Evidence about {query}"),
                format!("https://example.com/{}", query.replace(' ', "-")),
            )]),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Fast retry settings so failure paths do not slow the suite down.
pub fn test_config() -> ResearchConfig {
    ResearchConfig {
        per_call_timeout: Duration::from_secs(5),
        retry_backoff: Duration::from_millis(1),
        translate_queries: false,
        search_before_planning: false,
        ..Default::default()
    }
}

pub fn controller(llm: Arc<MockLLMClient>, fetcher: Arc<MockFetcher>) -> ResearchController {
    ResearchController::new(
        llm,
        fetcher,
        Arc::new(MarkdownRenderer),
        ControllerOptions {
            defaults: test_config(),
            ..Default::default()
        },
    )
}
