//! HTTP API Handlers and Routes
//!
//! A thin axum layer over [`ResearchController`](crate::research::ResearchController).
//!
//! # API Endpoints
//!
//! ## Research (`/api/research`)
//! - `POST /api/research` - Submit a run, returns `202` with the task id
//! - `GET /api/research/{id}` - Current stage and outcome
//! - `DELETE /api/research/{id}` - Release a finished task, `409` while it runs
//! - `POST /api/research/{id}/cancel` - Request cancellation
//! - `GET /api/research/{id}/events` - Server-sent progress events (full replay, then live)
//!
//! ## Health (`/api/health`)
//! - `GET /api/health` - Health check endpoint
//!
//! Errors are returned as `{"error": "..."}` with the status code of the
//! matching [`AppError`](crate::types::AppError) variant.

/// Request and response handlers for all API endpoints.
pub mod handlers;
/// Router configuration and route definitions.
pub mod routes;

use crate::AppState;
use axum::Router;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Full application router with tracing and CORS layers, mounted under `/api`.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/api", routes::create_router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
