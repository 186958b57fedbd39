//! Research Orchestration
//!
//! Turns a natural-language query into a cited report by driving a fixed
//! pipeline of stages while streaming progress to any number of observers.
//!
//! # Architecture
//!
//! - [`controller::ResearchController`] - submits, tracks and cancels runs
//! - [`planner::SubQueryPlanner`] - decomposes the query into sub-questions
//! - [`fanout::FanOut`] - fetches evidence for every sub-question in parallel
//! - [`aggregator::aggregate`] - merges and deduplicates evidence
//! - [`drafting::DraftStage`] - writes the initial draft
//! - [`review::ReviewLoop`] - bounded review/revise state machine
//! - [`publisher::Publisher`] - hands the final draft to a renderer
//! - [`events::EventBus`] - per-task ordered progress events with replay
//!
//! # Usage
//!
//! ```ignore
//! use deepcite::research::{ControllerOptions, ResearchController, ResearchConfig};
//!
//! let controller = ResearchController::new(llm, fetcher, renderer, ControllerOptions::default());
//! let task_id = controller.submit("How are EV batteries recycled?", ResearchConfig::default())?;
//!
//! let mut events = controller.subscribe(task_id)?;
//! while let Some(event) = events.next().await {
//!     println!("#{} {}", event.sequence, event.kind.name());
//! }
//!
//! let outcome = controller.wait(task_id).await?;
//! ```
//!
//! # Failure model
//!
//! Transient fetch and generation failures are retried inside the stage
//! that hit them. A failed sub-question only produces a warning event. A
//! run fails when every sub-question fails, or when drafting, reviewing or
//! revising runs out of attempts. Cancellation is its own terminal outcome.

pub mod aggregator;
pub mod controller;
pub mod drafting;
pub mod events;
pub mod fanout;
pub mod planner;
pub mod prompts;
pub mod publisher;
pub mod review;
pub mod stage;
pub mod types;

pub use controller::{ControllerOptions, ResearchController};
pub use events::{EventBus, EventEmitter, EventKind, EventStream, PartialResult, ProgressEvent};
pub use publisher::{Deliverable, MarkdownRenderer, RenderError, ReportRenderer};
pub use types::{
    Critique, Draft, EvidenceItem, ExhaustionPolicy, FailureCause, ResearchConfig,
    ResearchContext, ResearchTask, ReviewResolution, RunOutcome, Source, Stage, StageError,
    SubQuestion, TaskId, TaskStatus, Verdict,
};
