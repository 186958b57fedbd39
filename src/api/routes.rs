use crate::AppState;
use crate::api::handlers::research;
use axum::{
    Router,
    routing::{get, post},
};

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(research::health))
        .route("/research", post(research::submit_research))
        .route(
            "/research/{id}",
            get(research::get_research).delete(research::forget_research),
        )
        .route("/research/{id}/cancel", post(research::cancel_research))
        .route("/research/{id}/events", get(research::research_events))
}
