//! Publisher
//!
//! Hands the final draft, with its numbered source list appended, to a
//! [`ReportRenderer`]. A render failure never touches the draft itself; the
//! controller keeps it on the completed outcome either way.

use crate::research::stage::{cancellable, StageContext};
use crate::research::types::{Draft, Source};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deliverable {
    pub content_type: String,
    pub body: String,
    pub rendered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("nothing to render")]
    EmptyDocument,

    #[error("render failed: {0}")]
    Failed(String),

    #[error("render timed out after {0:?}")]
    Timeout(Duration),

    #[error("render cancelled")]
    Cancelled,
}

/// Rendering target for finished reports.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReportRenderer: Send + Sync {
    async fn render(&self, text: &str) -> Result<Deliverable, RenderError>;
}

/// Emits the document unchanged as Markdown.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownRenderer;

#[async_trait]
impl ReportRenderer for MarkdownRenderer {
    async fn render(&self, text: &str) -> Result<Deliverable, RenderError> {
        if text.trim().is_empty() {
            return Err(RenderError::EmptyDocument);
        }
        Ok(Deliverable {
            content_type: "text/markdown".to_string(),
            body: text.to_string(),
            rendered_at: Utc::now(),
        })
    }
}

pub struct Publisher {
    renderer: Arc<dyn ReportRenderer>,
}

impl Publisher {
    pub fn new(renderer: Arc<dyn ReportRenderer>) -> Self {
        Self { renderer }
    }

    pub async fn publish(
        &self,
        draft: &Draft,
        sources: &[Source],
        ctx: &StageContext,
    ) -> Result<Deliverable, RenderError> {
        let document = compose(draft, sources);
        let timeout = ctx.config().per_call_timeout;
        let call = tokio::time::timeout(timeout, self.renderer.render(&document));

        match cancellable(&ctx.cancellation_token(), call).await {
            None => Err(RenderError::Cancelled),
            Some(Ok(result)) => result,
            Some(Err(_)) => Err(RenderError::Timeout(timeout)),
        }
    }
}

/// Draft body followed by a `## Sources` list numbered in citation order.
pub fn compose(draft: &Draft, sources: &[Source]) -> String {
    let mut document = draft.body.trim_end().to_string();
    if !sources.is_empty() {
        document.push_str("\n\n## Sources\n\n");
        for (i, source) in sources.iter().enumerate() {
            let _ = writeln!(document, "{}. {}", i + 1, source.source_id);
        }
    }
    document
}
