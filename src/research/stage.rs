//! Shared plumbing for pipeline stages: stage transitions with their
//! events, cooperative cancellation, and bounded generator retries.

use crate::llm::{LLMClient, PromptContext};
use crate::research::events::EventEmitter;
use crate::research::types::{ResearchConfig, ResearchTask, Stage, StageError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
    pub per_call_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ResearchConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: config.retry_backoff,
            per_call_timeout: config.per_call_timeout,
        }
    }

    /// Linear backoff before attempt `attempt + 1`.
    fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt)
    }
}

/// Why a retried call gave up.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    #[error("cancelled")]
    Cancelled,

    #[error("gave up after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },
}

/// Run `future` unless `cancel` fires first.
pub async fn cancellable<F: Future>(cancel: &CancellationToken, future: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        output = future => Some(output),
    }
}

/// Everything a stage needs to report progress and honour cancellation.
#[derive(Debug, Clone)]
pub struct StageContext {
    task: Arc<ResearchTask>,
    pub events: EventEmitter,
    pub retry: RetryPolicy,
}

impl StageContext {
    pub fn new(task: Arc<ResearchTask>, events: EventEmitter) -> Self {
        let retry = RetryPolicy::from_config(&task.config);
        Self {
            task,
            events,
            retry,
        }
    }

    pub fn task(&self) -> &ResearchTask {
        &self.task
    }

    pub fn config(&self) -> &ResearchConfig {
        &self.task.config
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.task.cancellation_token()
    }

    pub fn check_cancelled(&self) -> Result<(), StageError> {
        if self.task.is_cancelled() {
            Err(StageError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Transition into `stage` and emit its stage-started event.
    ///
    /// The cancellation flag is checked first so that no stage starts after
    /// a cancel request.
    pub fn enter(&self, stage: Stage) -> Result<(), StageError> {
        self.check_cancelled()?;
        let previous = self.task.advance(stage)?;
        tracing::info!(task_id = %self.task.id, from = %previous, to = %stage, "Stage started");
        self.events.stage_started(stage);
        Ok(())
    }

    pub fn complete(&self, stage: Stage) {
        tracing::debug!(task_id = %self.task.id, %stage, "Stage completed");
        self.events.stage_completed(stage);
    }

    /// Call the generator with the per-call timeout, retrying failures up
    /// to the attempt bound. Blank output counts as a failure.
    pub async fn generate(
        &self,
        llm: &dyn LLMClient,
        prompt: &PromptContext,
    ) -> Result<String, CallError> {
        let cancel = self.task.cancellation_token();
        let mut last_error = String::new();

        for attempt in 1..=self.retry.max_attempts {
            let call = tokio::time::timeout(
                self.retry.per_call_timeout,
                llm.generate_structured(prompt),
            );

            let error = match cancellable(&cancel, call).await {
                None => return Err(CallError::Cancelled),
                Some(Ok(Ok(text))) if !text.trim().is_empty() => return Ok(text),
                Some(Ok(Ok(_))) => "generator returned an empty response".to_string(),
                Some(Ok(Err(e))) => e.to_string(),
                Some(Err(_)) => format!(
                    "generator call timed out after {:?}",
                    self.retry.per_call_timeout
                ),
            };

            tracing::warn!(
                task_id = %self.task.id,
                prompt = prompt.kind.as_str(),
                attempt,
                max_attempts = self.retry.max_attempts,
                error = %error,
                "Generator call failed"
            );
            last_error = error;

            if attempt < self.retry.max_attempts
                && cancellable(&cancel, tokio::time::sleep(self.retry.delay_after(attempt)))
                    .await
                    .is_none()
            {
                return Err(CallError::Cancelled);
            }
        }

        Err(CallError::Exhausted {
            attempts: self.retry.max_attempts,
            last_error,
        })
    }
}
