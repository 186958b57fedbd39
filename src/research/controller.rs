//! Orchestration controller
//!
//! Owns every [`ResearchTask`] it starts and is the only component that
//! sees a run end to end. Each submitted task runs on its own tokio task:
//!
//! ```text
//! Created -> Planning -> Gathering -> Drafting -> Reviewing <-> Revising
//!         -> Publishing -> Completed
//! ```
//!
//! with `Failed` reachable from any stage and `Cancelled` from any
//! non-terminal stage. The outcome is recorded on the task before the
//! terminal event is written, so anyone who has seen the terminal event can
//! read the final status.

use crate::llm::LLMClient;
use crate::research::aggregator::aggregate;
use crate::research::drafting::DraftStage;
use crate::research::events::{
    EventBus, EventStream, PartialResult, ProgressEvent, DEFAULT_EVENT_BUFFER,
};
use crate::research::fanout::FanOut;
use crate::research::planner::SubQueryPlanner;
use crate::research::publisher::{Publisher, RenderError, ReportRenderer};
use crate::research::review::ReviewLoop;
use crate::research::stage::StageContext;
use crate::research::types::{
    FailureCause, ResearchConfig, ResearchTask, RunOutcome, Stage, StageError, TaskId, TaskStatus,
};
use crate::retrieval::EvidenceFetcher;
use crate::types::{AppError, ResearchRequest, Result};
use futures::{FutureExt, StreamExt};
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::Instrument;

/// Controller-wide settings.
#[derive(Clone)]
pub struct ControllerOptions {
    /// Configuration applied to submissions that do not override it.
    pub defaults: ResearchConfig,
    /// Live broadcast buffer per task event log.
    pub event_buffer: usize,
    /// Planner generator used after the main one gives up.
    pub planner_fallback: Option<Arc<dyn LLMClient>>,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            defaults: ResearchConfig::default(),
            event_buffer: DEFAULT_EVENT_BUFFER,
            planner_fallback: None,
        }
    }
}

struct Inner {
    llm: Arc<dyn LLMClient>,
    planner_fallback: Option<Arc<dyn LLMClient>>,
    fetcher: Arc<dyn EvidenceFetcher>,
    renderer: Arc<dyn ReportRenderer>,
    events: EventBus,
    tasks: RwLock<HashMap<TaskId, Arc<ResearchTask>>>,
    defaults: ResearchConfig,
}

/// Cheap to clone; clones share the same tasks and event logs.
#[derive(Clone)]
pub struct ResearchController {
    inner: Arc<Inner>,
}

impl ResearchController {
    pub fn new(
        llm: Arc<dyn LLMClient>,
        fetcher: Arc<dyn EvidenceFetcher>,
        renderer: Arc<dyn ReportRenderer>,
        options: ControllerOptions,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                llm,
                planner_fallback: options.planner_fallback,
                fetcher,
                renderer,
                events: EventBus::new(options.event_buffer),
                tasks: RwLock::new(HashMap::new()),
                defaults: options.defaults,
            }),
        }
    }

    pub fn defaults(&self) -> &ResearchConfig {
        &self.inner.defaults
    }

    /// Resolve a request's optional bounds against the controller defaults.
    pub fn config_for(&self, request: &ResearchRequest) -> Result<ResearchConfig> {
        self.inner.defaults.with_overrides(request)
    }

    /// Start a run and return its identifier without waiting for it.
    ///
    /// Invalid configuration is rejected here and no task is created.
    pub fn submit(&self, query: &str, config: ResearchConfig) -> Result<TaskId> {
        let query = query.trim();
        if query.is_empty() {
            return Err(AppError::InvalidInput("query must not be empty".to_string()));
        }
        config.validate()?;

        let task = Arc::new(ResearchTask::new(query, config));
        let task_id = task.id;
        let events = self.inner.events.register(task_id);
        self.inner.tasks.write().insert(task_id, Arc::clone(&task));

        tracing::info!(%task_id, query, "Research task submitted");

        let inner = Arc::clone(&self.inner);
        let ctx = StageContext::new(task, events);
        let span = tracing::info_span!("research", %task_id);
        tokio::spawn(async move { inner.run(ctx).await }.instrument(span));

        Ok(task_id)
    }

    /// Submit with the request's overrides applied to the defaults.
    pub fn submit_request(&self, request: &ResearchRequest) -> Result<TaskId> {
        let config = self.config_for(request)?;
        self.submit(&request.query, config)
    }

    /// Request cancellation. Returns `false` if the run had already ended.
    pub fn cancel(&self, task_id: TaskId) -> Result<bool> {
        let task = self.task(task_id)?;
        let cancelled = task.request_cancel();
        if cancelled {
            tracing::info!(%task_id, stage = %task.stage(), "Cancellation requested");
        }
        Ok(cancelled)
    }

    pub fn status(&self, task_id: TaskId) -> Result<TaskStatus> {
        Ok(self.task(task_id)?.status())
    }

    /// Every event from sequence 0, then live events until the terminal one.
    pub fn subscribe(&self, task_id: TaskId) -> Result<EventStream> {
        self.inner
            .events
            .subscribe(task_id)
            .ok_or_else(|| not_found(task_id))
    }

    /// Events emitted so far, without waiting.
    pub fn events(&self, task_id: TaskId) -> Result<Vec<ProgressEvent>> {
        self.inner
            .events
            .history(task_id)
            .ok_or_else(|| not_found(task_id))
    }

    /// Wait for the run to reach a terminal stage and return its outcome.
    pub async fn wait(&self, task_id: TaskId) -> Result<RunOutcome> {
        let mut stream = self.subscribe(task_id)?;
        while let Some(event) = stream.next().await {
            if event.is_terminal() {
                break;
            }
        }
        self.task(task_id)?
            .outcome()
            .ok_or_else(|| AppError::Internal(format!("task {task_id} ended without an outcome")))
    }

    /// Drop a finished task and its event log.
    pub fn forget(&self, task_id: TaskId) -> Result<()> {
        let task = self.task(task_id)?;
        if !task.stage().is_terminal() {
            return Err(AppError::Conflict(format!(
                "task {task_id} is still {}",
                task.stage()
            )));
        }
        self.inner.tasks.write().remove(&task_id);
        self.inner.events.remove(task_id);
        Ok(())
    }

    /// Tasks that have not reached a terminal stage.
    pub fn active_tasks(&self) -> usize {
        self.inner
            .tasks
            .read()
            .values()
            .filter(|t| !t.stage().is_terminal())
            .count()
    }

    fn task(&self, task_id: TaskId) -> Result<Arc<ResearchTask>> {
        self.inner
            .tasks
            .read()
            .get(&task_id)
            .cloned()
            .ok_or_else(|| not_found(task_id))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn not_found(task_id: TaskId) -> AppError {
    AppError::NotFound(format!("research task {task_id}"))
}

impl Inner {
    async fn run(&self, ctx: StageContext) {
        let result = match AssertUnwindSafe(self.pipeline(&ctx)).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => {
                let stage = ctx.task().stage();
                let message = format!("{stage} stage panicked: {}", panic_message(&*payload));
                Err(StageError::fatal(stage, FailureCause::Internal(message)))
            }
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(StageError::Cancelled) => RunOutcome::Cancelled {
                stage: ctx.task().stage(),
            },
            Err(StageError::Fatal {
                stage,
                cause,
                last_draft,
            }) => {
                ctx.events.error(stage, cause.to_string());
                RunOutcome::Failed {
                    stage,
                    cause,
                    last_draft,
                }
            }
        };

        let task = ctx.task();
        match &outcome {
            RunOutcome::Completed { resolution, .. } => {
                tracing::info!(task_id = %task.id, ?resolution, "Research completed")
            }
            RunOutcome::Failed { stage, cause, .. } => {
                tracing::error!(task_id = %task.id, %stage, %cause, "Research failed")
            }
            RunOutcome::Cancelled { stage } => {
                tracing::info!(task_id = %task.id, %stage, "Research cancelled")
            }
        }

        if task.finish(outcome.clone()) {
            ctx.events.terminal(&outcome);
        }
    }

    async fn pipeline(&self, ctx: &StageContext) -> std::result::Result<RunOutcome, StageError> {
        let task = ctx.task();
        let config = ctx.config();

        ctx.enter(Stage::Planning)?;
        let planner = SubQueryPlanner::new(Arc::clone(&self.llm))
            .with_fallback(self.planner_fallback.clone())
            .with_search(Arc::clone(&self.fetcher));
        let sub_questions = planner
            .plan(&task.query, config.max_sub_questions, ctx)
            .await?;
        ctx.events.partial(PartialResult::SubQuestionsPlanned {
            questions: sub_questions.iter().map(|q| q.text.clone()).collect(),
        });
        ctx.complete(Stage::Planning);

        ctx.enter(Stage::Gathering)?;
        let results = FanOut::new(Arc::clone(&self.fetcher))
            .fetch_all(&sub_questions, config.per_call_timeout, ctx)
            .await?;
        let context = aggregate(&results);
        if results.values().all(|r| r.is_err()) || context.is_empty() {
            return Err(StageError::fatal(Stage::Gathering, FailureCause::NoEvidence));
        }
        let sources = context.sources();
        ctx.events.partial(PartialResult::ContextAggregated {
            items: context.len(),
            sources: sources.len(),
        });
        ctx.complete(Stage::Gathering);

        ctx.enter(Stage::Drafting)?;
        let draft = DraftStage::new(Arc::clone(&self.llm))
            .draft(&task.query, &context, ctx)
            .await?;
        ctx.complete(Stage::Drafting);

        let review = ReviewLoop::new(
            Arc::clone(&self.llm),
            config.max_revision_iterations,
            config.exhaustion_policy,
        )
        .run(&task.query, &context, draft, ctx)
        .await?;
        tracing::debug!(
            task_id = %task.id,
            versions = review.versions,
            resolution = ?review.resolution,
            "Review loop finished"
        );

        ctx.enter(Stage::Publishing)?;
        let publisher = Publisher::new(Arc::clone(&self.renderer));
        let published = publisher.publish(&review.final_draft, &sources, ctx).await;
        let (deliverable, publish_error) = match published {
            Ok(deliverable) => (Some(deliverable), None),
            Err(RenderError::Cancelled) => return Err(StageError::Cancelled),
            Err(e) => {
                tracing::warn!(task_id = %task.id, error = %e, "Publishing failed, keeping draft");
                ctx.events.error(Stage::Publishing, e.to_string());
                (None, Some(e.to_string()))
            }
        };
        ctx.complete(Stage::Publishing);

        Ok(RunOutcome::Completed {
            final_draft: review.final_draft,
            resolution: review.resolution,
            sources,
            deliverable,
            publish_error,
        })
    }
}
