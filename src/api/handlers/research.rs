use crate::{
    AppState,
    research::{ProgressEvent, TaskStatus},
    types::{AppError, HealthResponse, ResearchRequest, Result, StatusResponse, SubmitResponse},
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::{Stream, StreamExt};
use uuid::Uuid;

impl From<TaskStatus> for StatusResponse {
    fn from(status: TaskStatus) -> Self {
        Self {
            task_id: status.task_id,
            query: status.query,
            stage: status.stage,
            outcome: status.outcome,
        }
    }
}

/// Submit a research run. Returns immediately with the task id.
///
/// Bounds the request leaves out come from the current `[research]`
/// section, so a reloaded config applies to the next submission.
pub async fn submit_research(
    State(state): State<AppState>,
    Json(payload): Json<ResearchRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>)> {
    let config = state
        .config_manager
        .config()
        .research_defaults()
        .with_overrides(&payload)?;
    let task_id = state.controller.submit(&payload.query, config)?;
    let stage = state.controller.status(task_id)?.stage;

    Ok((StatusCode::ACCEPTED, Json(SubmitResponse { task_id, stage })))
}

/// Current stage and, once terminal, the run outcome.
pub async fn get_research(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> Result<Json<StatusResponse>> {
    Ok(Json(state.controller.status(task_id)?.into()))
}

/// Request cancellation of a running task.
///
/// Cancelling a task that already reached a terminal stage is a conflict.
pub async fn cancel_research(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> Result<(StatusCode, Json<StatusResponse>)> {
    if !state.controller.cancel(task_id)? {
        return Err(AppError::Conflict(format!(
            "research task {task_id} has already finished"
        )));
    }
    let status = state.controller.status(task_id)?;
    Ok((StatusCode::ACCEPTED, Json(status.into())))
}

/// Release a finished task and its event log.
///
/// A task that is still running is a conflict; cancel it first.
pub async fn forget_research(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> Result<StatusCode> {
    state.controller.forget(task_id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Server-sent progress events: every event from sequence 0, then live
/// events. The stream ends after the terminal event.
pub async fn research_events(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, axum::Error>>>> {
    let events = state.controller.subscribe(task_id)?;
    let stream = events.map(|event: ProgressEvent| {
        Event::default()
            .id(event.sequence.to_string())
            .event(event.kind.name())
            .json_data(&event)
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        active_tasks: state.controller.active_tasks(),
    })
}
