//! Review/revise loop
//!
//! An explicit state machine over `Reviewing`, `Revising`, `Accepted` and
//! `Exhausted`, starting in `Reviewing` on `Draft(0)`. A revise verdict on
//! `Draft(n)` leads to another revision only while `n` is below the
//! configured bound, so at most `max_revision_iterations + 1` drafts are
//! ever produced.

use crate::llm::LLMClient;
use crate::research::events::PartialResult;
use crate::research::prompts::{self, json_values};
use crate::research::stage::{CallError, StageContext};
use crate::research::types::{
    Critique, Draft, ExhaustionPolicy, FailureCause, ResearchContext, ReviewResolution, Stage,
    StageError, Verdict,
};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct ReviewOutcome {
    pub final_draft: Draft,
    pub resolution: ReviewResolution,
    /// Drafts produced, including `Draft(0)`.
    pub versions: u32,
}

#[derive(Debug)]
enum LoopState {
    Reviewing(Draft),
    Revising(Draft, Critique),
    Accepted(Draft),
    Exhausted(Draft),
}

pub struct ReviewLoop {
    llm: Arc<dyn LLMClient>,
    max_revision_iterations: u32,
    policy: ExhaustionPolicy,
}

impl ReviewLoop {
    pub fn new(
        llm: Arc<dyn LLMClient>,
        max_revision_iterations: u32,
        policy: ExhaustionPolicy,
    ) -> Self {
        Self {
            llm,
            max_revision_iterations,
            policy,
        }
    }

    /// Drive the loop from `initial` until it accepts or runs out of
    /// revisions. Stage transitions between reviewing and revising are made
    /// here; the caller enters neither.
    pub async fn run(
        &self,
        query: &str,
        context: &ResearchContext,
        initial: Draft,
        ctx: &StageContext,
    ) -> Result<ReviewOutcome, StageError> {
        let mut state = LoopState::Reviewing(initial);

        loop {
            state = match state {
                LoopState::Reviewing(draft) => {
                    ctx.enter(Stage::Reviewing)?;
                    let critique = self.review(query, context, &draft, ctx).await?;
                    ctx.complete(Stage::Reviewing);

                    match critique.verdict {
                        Verdict::Accept => LoopState::Accepted(draft),
                        Verdict::Revise if draft.version < self.max_revision_iterations => {
                            LoopState::Revising(draft, critique)
                        }
                        Verdict::Revise => LoopState::Exhausted(draft),
                    }
                }
                LoopState::Revising(draft, critique) => {
                    ctx.enter(Stage::Revising)?;
                    let revised = self.revise(query, context, &draft, critique, ctx).await?;
                    ctx.complete(Stage::Revising);
                    LoopState::Reviewing(revised)
                }
                LoopState::Accepted(draft) => {
                    tracing::info!(
                        task_id = %ctx.task().id,
                        version = draft.version,
                        "Draft accepted"
                    );
                    return Ok(ReviewOutcome {
                        versions: draft.version + 1,
                        final_draft: draft,
                        resolution: ReviewResolution::Accepted,
                    });
                }
                LoopState::Exhausted(draft) => return self.exhausted(draft, ctx),
            };
        }
    }

    async fn review(
        &self,
        query: &str,
        context: &ResearchContext,
        draft: &Draft,
        ctx: &StageContext,
    ) -> Result<Critique, StageError> {
        let reply = ctx
            .generate(&*self.llm, &prompts::review(query, draft, context))
            .await
            .map_err(|e| generation_failure(Stage::Reviewing, e, draft))?;

        let critique = parse_critique(&reply);
        ctx.events.partial(PartialResult::CritiqueReceived {
            version: draft.version,
            verdict: critique.verdict,
            issues: critique.issues.len(),
        });
        Ok(critique)
    }

    async fn revise(
        &self,
        query: &str,
        context: &ResearchContext,
        draft: &Draft,
        critique: Critique,
        ctx: &StageContext,
    ) -> Result<Draft, StageError> {
        let body = ctx
            .generate(&*self.llm, &prompts::revise(query, draft, &critique, context))
            .await
            .map_err(|e| generation_failure(Stage::Revising, e, draft))?;

        let revised = draft.revised(body.trim().to_string(), critique);
        ctx.events
            .partial(PartialResult::DraftProduced { version: revised.version });
        Ok(revised)
    }

    fn exhausted(&self, draft: Draft, ctx: &StageContext) -> Result<ReviewOutcome, StageError> {
        let bound = self.max_revision_iterations;
        match self.policy {
            ExhaustionPolicy::AcceptWithWarning => {
                ctx.events.warning(
                    Stage::Reviewing,
                    format!(
                        "Revision limit of {bound} reached; keeping draft version {}",
                        draft.version
                    ),
                );
                Ok(ReviewOutcome {
                    versions: draft.version + 1,
                    final_draft: draft,
                    resolution: ReviewResolution::Exhausted,
                })
            }
            ExhaustionPolicy::Fail => Err(StageError::Fatal {
                stage: Stage::Reviewing,
                cause: FailureCause::RevisionExhausted(bound),
                last_draft: Some(draft),
            }),
        }
    }
}

fn generation_failure(stage: Stage, error: CallError, last_draft: &Draft) -> StageError {
    match error {
        CallError::Cancelled => StageError::Cancelled,
        e @ CallError::Exhausted { .. } => StageError::Fatal {
            stage,
            cause: FailureCause::Generation(e.to_string()),
            last_draft: Some(last_draft.clone()),
        },
    }
}

#[derive(Debug, Deserialize)]
struct CritiqueReply {
    verdict: String,
    #[serde(default)]
    issues: Vec<String>,
}

/// Read a reviewer reply into a [`Critique`].
///
/// The JSON shape requested by the review prompt is preferred. Otherwise a
/// reply whose first line is an approval is an accept, and anything else is
/// a revise carrying the reply's bullet lines (or the whole reply) as issues.
pub fn parse_critique(reply: &str) -> Critique {
    if let Some(parsed) = json_values::<CritiqueReply>(reply, '{').next() {
        return match parsed.verdict.trim().to_lowercase().as_str() {
            "accept" | "accepted" | "approve" | "approved" => Critique::accept(),
            _ => Critique::revise(parsed.issues),
        };
    }

    let first = reply
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default()
        .to_lowercase();
    let first = first.trim_start_matches(|c: char| !c.is_alphanumeric());
    if ["accept", "approve", "lgtm"].iter().any(|w| first.starts_with(w)) {
        return Critique::accept();
    }

    let bullets: Vec<String> = reply
        .lines()
        .map(str::trim)
        .filter(|l| {
            l.starts_with(['-', '*']) || l.chars().next().is_some_and(|c| c.is_ascii_digit())
        })
        .map(|l| {
            l.trim_start_matches(|c: char| c.is_ascii_digit() || matches!(c, '.' | ')' | '-' | '*'))
                .trim()
                .to_string()
        })
        .collect();

    if bullets.iter().any(|b| !b.is_empty()) {
        Critique::revise(bullets)
    } else {
        Critique::revise(vec![reply.trim().to_string()])
    }
}
