//! Progress event bus
//!
//! Every research task gets its own append-only event log. Sequence numbers
//! are assigned under the log's mutex, which is also where the event is
//! appended and broadcast, so all observers see one total order per task
//! even when fan-out branches emit concurrently. Unrelated tasks never
//! contend on the same lock; the bus-wide map is only write-locked when a
//! task is registered or forgotten.
//!
//! Subscribers get **full replay**: every event from sequence 0, followed by
//! live events, ending after the terminal event. A subscriber that falls
//! behind the broadcast buffer re-reads what it missed from the retained log
//! instead of skipping events.

use crate::research::types::{FailureCause, ReviewResolution, RunOutcome, Stage, TaskId, Verdict};
use async_stream::stream;
use chrono::{DateTime, Utc};
use futures::Stream;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};

pub const DEFAULT_EVENT_BUFFER: usize = 256;

// ============= Event Types =============

/// Incremental results surfaced while a stage is still running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum PartialResult {
    SubQuestionsPlanned { questions: Vec<String> },
    EvidenceGathered { sub_question: usize, items: usize },
    ContextAggregated { items: usize, sources: usize },
    DraftProduced { version: u32 },
    CritiqueReceived { version: u32, verdict: Verdict, issues: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    StageStarted {
        stage: Stage,
    },
    StageCompleted {
        stage: Stage,
    },
    PartialResult(PartialResult),
    Warning {
        stage: Stage,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        sub_question: Option<usize>,
    },
    Error {
        stage: Stage,
        message: String,
    },
    Terminal {
        state: Stage,
        #[serde(skip_serializing_if = "Option::is_none")]
        failed_stage: Option<Stage>,
        #[serde(skip_serializing_if = "Option::is_none")]
        cause: Option<FailureCause>,
        #[serde(skip_serializing_if = "Option::is_none")]
        resolution: Option<ReviewResolution>,
    },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::StageStarted { .. } => "stage_started",
            EventKind::StageCompleted { .. } => "stage_completed",
            EventKind::PartialResult(_) => "partial_result",
            EventKind::Warning { .. } => "warning",
            EventKind::Error { .. } => "error",
            EventKind::Terminal { .. } => "terminal",
        }
    }

    pub fn terminal(outcome: &RunOutcome) -> Self {
        match outcome {
            RunOutcome::Completed { resolution, .. } => EventKind::Terminal {
                state: Stage::Completed,
                failed_stage: None,
                cause: None,
                resolution: Some(*resolution),
            },
            RunOutcome::Failed { stage, cause, .. } => EventKind::Terminal {
                state: Stage::Failed,
                failed_stage: Some(*stage),
                cause: Some(cause.clone()),
                resolution: None,
            },
            RunOutcome::Cancelled { stage } => EventKind::Terminal {
                state: Stage::Cancelled,
                failed_stage: Some(*stage),
                cause: None,
                resolution: None,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub task_id: TaskId,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, EventKind::Terminal { .. })
    }
}

pub type EventStream = Pin<Box<dyn Stream<Item = ProgressEvent> + Send>>;

// ============= Per-task Log =============

#[derive(Debug, Default)]
struct LogState {
    events: Vec<ProgressEvent>,
    next_sequence: u64,
    closed: bool,
}

#[derive(Debug)]
struct TaskLog {
    task_id: TaskId,
    state: Mutex<LogState>,
    tx: broadcast::Sender<ProgressEvent>,
}

impl TaskLog {
    fn new(task_id: TaskId, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            task_id,
            state: Mutex::new(LogState::default()),
            tx,
        }
    }

    fn append(&self, kind: EventKind) -> Option<u64> {
        let mut state = self.state.lock();
        if state.closed {
            tracing::debug!(
                task_id = %self.task_id,
                kind = kind.name(),
                "Dropping event emitted after terminal event"
            );
            return None;
        }

        let event = ProgressEvent {
            task_id: self.task_id,
            sequence: state.next_sequence,
            timestamp: Utc::now(),
            kind,
        };
        state.next_sequence += 1;
        state.closed = event.is_terminal();
        state.events.push(event.clone());

        // No receivers is fine: late subscribers replay from the log.
        let _ = self.tx.send(event.clone());
        Some(event.sequence)
    }

    fn events_from(&self, sequence: u64) -> Vec<ProgressEvent> {
        let state = self.state.lock();
        state
            .events
            .iter()
            .filter(|e| e.sequence >= sequence)
            .cloned()
            .collect()
    }

    fn subscribe(self: &Arc<Self>) -> EventStream {
        // Snapshot and receiver are taken under the same lock that `append`
        // holds while sending, so nothing falls between them.
        let (replay, mut rx, closed) = {
            let state = self.state.lock();
            (state.events.clone(), self.tx.subscribe(), state.closed)
        };
        let log = Arc::clone(self);

        Box::pin(stream! {
            let mut next = 0u64;

            for event in replay {
                next = event.sequence + 1;
                let terminal = event.is_terminal();
                yield event;
                if terminal {
                    return;
                }
            }
            if closed {
                return;
            }

            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if event.sequence < next {
                            continue;
                        }
                        next = event.sequence + 1;
                        let terminal = event.is_terminal();
                        yield event;
                        if terminal {
                            return;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(
                            task_id = %log.task_id,
                            skipped,
                            "Subscriber lagged, recovering from event log"
                        );
                        for event in log.events_from(next) {
                            next = event.sequence + 1;
                            let terminal = event.is_terminal();
                            yield event;
                            if terminal {
                                return;
                            }
                        }
                    }
                    Err(RecvError::Closed) => return,
                }
            }
        })
    }
}

// ============= Emitter =============

/// Write handle for one task's log. Cheap to clone into fan-out units.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    log: Arc<TaskLog>,
}

impl EventEmitter {
    pub fn task_id(&self) -> TaskId {
        self.log.task_id
    }

    /// Append an event, returning its sequence number, or `None` once the
    /// terminal event has been written.
    pub fn emit(&self, kind: EventKind) -> Option<u64> {
        self.log.append(kind)
    }

    pub fn stage_started(&self, stage: Stage) -> Option<u64> {
        self.emit(EventKind::StageStarted { stage })
    }

    pub fn stage_completed(&self, stage: Stage) -> Option<u64> {
        self.emit(EventKind::StageCompleted { stage })
    }

    pub fn partial(&self, result: PartialResult) -> Option<u64> {
        self.emit(EventKind::PartialResult(result))
    }

    pub fn warning(&self, stage: Stage, message: impl Into<String>) -> Option<u64> {
        self.emit(EventKind::Warning {
            stage,
            message: message.into(),
            sub_question: None,
        })
    }

    pub fn branch_warning(
        &self,
        stage: Stage,
        sub_question: usize,
        message: impl Into<String>,
    ) -> Option<u64> {
        self.emit(EventKind::Warning {
            stage,
            message: message.into(),
            sub_question: Some(sub_question),
        })
    }

    pub fn error(&self, stage: Stage, message: impl Into<String>) -> Option<u64> {
        self.emit(EventKind::Error {
            stage,
            message: message.into(),
        })
    }

    pub fn terminal(&self, outcome: &RunOutcome) -> Option<u64> {
        self.emit(EventKind::terminal(outcome))
    }
}

// ============= Bus =============

/// Registry of per-task event logs. The only state shared across tasks.
#[derive(Debug)]
pub struct EventBus {
    logs: RwLock<HashMap<TaskId, Arc<TaskLog>>>,
    capacity: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER)
    }
}

impl EventBus {
    /// `capacity` is the live broadcast buffer per task; the full history
    /// is always retained regardless.
    pub fn new(capacity: usize) -> Self {
        Self {
            logs: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Create the log for a new task and return its emitter.
    pub fn register(&self, task_id: TaskId) -> EventEmitter {
        let log = Arc::new(TaskLog::new(task_id, self.capacity));
        self.logs.write().insert(task_id, Arc::clone(&log));
        EventEmitter { log }
    }

    /// Replay from sequence 0 followed by live events.
    pub fn subscribe(&self, task_id: TaskId) -> Option<EventStream> {
        let log = self.logs.read().get(&task_id).cloned()?;
        Some(log.subscribe())
    }

    /// Everything emitted so far.
    pub fn history(&self, task_id: TaskId) -> Option<Vec<ProgressEvent>> {
        let log = self.logs.read().get(&task_id).cloned()?;
        Some(log.events_from(0))
    }

    pub fn remove(&self, task_id: TaskId) -> bool {
        self.logs.write().remove(&task_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.logs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.read().is_empty()
    }
}
