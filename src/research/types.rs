//! Data model of a research run.

use crate::research::publisher::Deliverable;
use crate::types::{AppError, ResearchRequest, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub type TaskId = Uuid;

/// Upper sanity bounds enforced at submission.
pub const MAX_SUB_QUESTIONS_LIMIT: usize = 32;
pub const MAX_REVISION_ITERATIONS_LIMIT: u32 = 20;

// ============= Stage State Machine =============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Created,
    Planning,
    Gathering,
    Drafting,
    Reviewing,
    Revising,
    Publishing,
    Completed,
    Failed,
    Cancelled,
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Completed | Stage::Failed | Stage::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Created => "created",
            Stage::Planning => "planning",
            Stage::Gathering => "gathering",
            Stage::Drafting => "drafting",
            Stage::Reviewing => "reviewing",
            Stage::Revising => "revising",
            Stage::Publishing => "publishing",
            Stage::Completed => "completed",
            Stage::Failed => "failed",
            Stage::Cancelled => "cancelled",
        }
    }

    /// Whether the controller may move from `self` to `next`.
    ///
    /// Forward-only, except the bounded Reviewing <-> Revising cycle.
    /// Failed and Cancelled are reachable from every non-terminal stage.
    pub fn can_transition_to(&self, next: Stage) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Stage::Failed | Stage::Cancelled => true,
            _ => matches!(
                (self, next),
                (Stage::Created, Stage::Planning)
                    | (Stage::Planning, Stage::Gathering)
                    | (Stage::Gathering, Stage::Drafting)
                    | (Stage::Drafting, Stage::Reviewing)
                    | (Stage::Reviewing, Stage::Revising)
                    | (Stage::Revising, Stage::Reviewing)
                    | (Stage::Reviewing, Stage::Publishing)
                    | (Stage::Publishing, Stage::Completed)
            ),
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============= Run Configuration =============

/// What to do when the reviewer still asks for changes after the last
/// allowed revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionPolicy {
    /// Keep the latest draft and emit a warning.
    #[default]
    AcceptWithWarning,
    /// Fail the run in the reviewing stage.
    Fail,
}

/// Configuration snapshot taken when a task is submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchConfig {
    pub max_sub_questions: usize,
    pub max_revision_iterations: u32,
    pub per_call_timeout: Duration,
    /// Attempts per generator call, including the first one.
    pub max_attempts: u32,
    pub retry_backoff: Duration,
    pub exhaustion_policy: ExhaustionPolicy,
    pub translate_queries: bool,
    /// Search the root query before planning and hand the hits to the planner.
    pub search_before_planning: bool,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_sub_questions: 4,
            max_revision_iterations: 2,
            per_call_timeout: Duration::from_secs(30),
            max_attempts: 3,
            retry_backoff: Duration::from_millis(200),
            exhaustion_policy: ExhaustionPolicy::AcceptWithWarning,
            translate_queries: true,
            search_before_planning: true,
        }
    }
}

impl ResearchConfig {
    /// This configuration with a submission's optional bounds applied.
    /// Negative bounds are rejected rather than clamped.
    pub fn with_overrides(&self, request: &ResearchRequest) -> Result<Self> {
        let mut config = self.clone();

        if let Some(n) = request.max_sub_questions {
            config.max_sub_questions = usize::try_from(n).map_err(|_| {
                AppError::InvalidInput(format!("max_sub_questions must not be negative, got {n}"))
            })?;
        }
        if let Some(n) = request.max_revision_iterations {
            config.max_revision_iterations = u32::try_from(n).map_err(|_| {
                AppError::InvalidInput(format!(
                    "max_revision_iterations must be between 0 and {}, got {n}",
                    MAX_REVISION_ITERATIONS_LIMIT
                ))
            })?;
        }
        if let Some(secs) = request.per_call_timeout_secs {
            let secs = u64::try_from(secs).map_err(|_| {
                AppError::InvalidInput(format!(
                    "per_call_timeout_secs must be greater than zero, got {secs}"
                ))
            })?;
            config.per_call_timeout = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_sub_questions == 0 || self.max_sub_questions > MAX_SUB_QUESTIONS_LIMIT {
            return Err(AppError::InvalidInput(format!(
                "max_sub_questions must be between 1 and {}, got {}",
                MAX_SUB_QUESTIONS_LIMIT, self.max_sub_questions
            )));
        }
        if self.max_revision_iterations > MAX_REVISION_ITERATIONS_LIMIT {
            return Err(AppError::InvalidInput(format!(
                "max_revision_iterations must be at most {}, got {}",
                MAX_REVISION_ITERATIONS_LIMIT, self.max_revision_iterations
            )));
        }
        if self.per_call_timeout.is_zero() {
            return Err(AppError::InvalidInput(
                "per_call_timeout must be greater than zero".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(AppError::InvalidInput(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

// ============= Research Artifacts =============

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubQuestion {
    pub index: usize,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub text: String,
    pub source_id: String,
    pub retrieved_at: DateTime<Utc>,
    pub sub_question: usize,
}

/// A cited source, in the order it first appears in the context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub source_id: String,
    pub sub_question: usize,
}

/// Deduplicated evidence, ordered by sub-question index then arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchContext {
    pub items: Vec<EvidenceItem>,
}

impl ResearchContext {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn sources(&self) -> Vec<Source> {
        let mut seen = std::collections::HashSet::new();
        self.items
            .iter()
            .filter(|item| seen.insert(item.source_id.as_str()))
            .map(|item| Source {
                source_id: item.source_id.clone(),
                sub_question: item.sub_question,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Accept,
    Revise,
}

/// Reviewer output. `issues` is empty exactly when the verdict is accept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Critique {
    pub verdict: Verdict,
    pub issues: Vec<String>,
}

impl Critique {
    pub fn accept() -> Self {
        Self {
            verdict: Verdict::Accept,
            issues: Vec::new(),
        }
    }

    /// A revise verdict always carries at least one issue.
    pub fn revise(issues: Vec<String>) -> Self {
        let mut issues: Vec<String> = issues
            .into_iter()
            .map(|i| i.trim().to_string())
            .filter(|i| !i.is_empty())
            .collect();
        if issues.is_empty() {
            issues.push(
                "Reviewer requested a revision without listing specific issues".to_string(),
            );
        }
        Self {
            verdict: Verdict::Revise,
            issues,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draft {
    pub version: u32,
    pub body: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub critique: Option<Critique>,
}

impl Draft {
    pub fn initial(body: String) -> Self {
        Self {
            version: 0,
            body,
            created_at: Utc::now(),
            critique: None,
        }
    }

    /// The next version, produced from this draft and the critique that
    /// rejected it.
    pub fn revised(&self, body: String, critique: Critique) -> Self {
        Self {
            version: self.version + 1,
            body,
            created_at: Utc::now(),
            critique: Some(critique),
        }
    }
}

// ============= Outcomes =============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewResolution {
    Accepted,
    /// Iteration bound reached; the latest draft was kept.
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "type", content = "detail", rename_all = "snake_case")]
pub enum FailureCause {
    #[error("no-evidence: every sub-question fetch failed or returned nothing")]
    NoEvidence,

    #[error("generation error: {0}")]
    Generation(String),

    #[error("revision exhausted after {0} iterations")]
    RevisionExhausted(u32),

    #[error("internal error: {0}")]
    Internal(String),
}

/// How a stage gave up. Transient and partial failures never reach this
/// type; they are absorbed inside the stage.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StageError {
    #[error("cancelled")]
    Cancelled,

    #[error("{stage} failed: {cause}")]
    Fatal {
        stage: Stage,
        cause: FailureCause,
        last_draft: Option<Draft>,
    },
}

impl StageError {
    pub fn fatal(stage: Stage, cause: FailureCause) -> Self {
        StageError::Fatal {
            stage,
            cause,
            last_draft: None,
        }
    }
}

/// Terminal result of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed {
        final_draft: Draft,
        resolution: ReviewResolution,
        sources: Vec<Source>,
        #[serde(skip_serializing_if = "Option::is_none")]
        deliverable: Option<Deliverable>,
        #[serde(skip_serializing_if = "Option::is_none")]
        publish_error: Option<String>,
    },
    Failed {
        stage: Stage,
        cause: FailureCause,
        /// Last successful draft, for diagnostics only.
        #[serde(skip_serializing_if = "Option::is_none")]
        last_draft: Option<Draft>,
    },
    Cancelled {
        stage: Stage,
    },
}

impl RunOutcome {
    pub fn terminal_stage(&self) -> Stage {
        match self {
            RunOutcome::Completed { .. } => Stage::Completed,
            RunOutcome::Failed { .. } => Stage::Failed,
            RunOutcome::Cancelled { .. } => Stage::Cancelled,
        }
    }
}

// ============= Research Task =============

#[derive(Debug)]
struct TaskState {
    stage: Stage,
    outcome: Option<RunOutcome>,
}

/// One end-to-end run, owned by the controller for its lifetime.
#[derive(Debug)]
pub struct ResearchTask {
    pub id: TaskId,
    pub query: String,
    pub created_at: DateTime<Utc>,
    pub config: ResearchConfig,
    cancel: CancellationToken,
    state: RwLock<TaskState>,
}

impl ResearchTask {
    pub fn new(query: impl Into<String>, config: ResearchConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            query: query.into(),
            created_at: Utc::now(),
            config,
            cancel: CancellationToken::new(),
            state: RwLock::new(TaskState {
                stage: Stage::Created,
                outcome: None,
            }),
        }
    }

    pub fn stage(&self) -> Stage {
        self.state.read().stage
    }

    pub fn outcome(&self) -> Option<RunOutcome> {
        self.state.read().outcome.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Set the cancellation flag. Returns `false` if the task already
    /// reached a terminal stage.
    pub fn request_cancel(&self) -> bool {
        if self.stage().is_terminal() {
            return false;
        }
        self.cancel.cancel();
        true
    }

    /// Move to a non-terminal stage.
    pub fn advance(&self, next: Stage) -> std::result::Result<Stage, StageError> {
        let mut state = self.state.write();
        if !state.stage.can_transition_to(next) || next.is_terminal() {
            return Err(StageError::fatal(
                state.stage,
                FailureCause::Internal(format!(
                    "illegal stage transition {} -> {}",
                    state.stage, next
                )),
            ));
        }
        let previous = state.stage;
        state.stage = next;
        Ok(previous)
    }

    /// Record the terminal outcome. The first outcome wins.
    pub fn finish(&self, outcome: RunOutcome) -> bool {
        let mut state = self.state.write();
        let terminal = outcome.terminal_stage();
        if !state.stage.can_transition_to(terminal) {
            return false;
        }
        state.stage = terminal;
        state.outcome = Some(outcome);
        true
    }

    pub fn status(&self) -> TaskStatus {
        let state = self.state.read();
        TaskStatus {
            task_id: self.id,
            query: self.query.clone(),
            created_at: self.created_at,
            stage: state.stage,
            config: self.config.clone(),
            outcome: state.outcome.clone(),
        }
    }
}

/// Snapshot returned by `status(taskId)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub task_id: TaskId,
    pub query: String,
    pub created_at: DateTime<Utc>,
    pub stage: Stage,
    pub config: ResearchConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<RunOutcome>,
}
