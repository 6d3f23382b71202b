//! The HTTP wire layer: request/response DTOs, validation, the single
//! `OrchestratorError -> HTTP` mapping, and the route handlers (spec §4.5).

pub mod dto;
pub mod error;
pub mod handlers;
pub mod validation;

pub use error::AppError;

use axum::Router;
use axum::routing::{get, post};

use crate::AppState;

/// Build the `/workflows*` router. Mounted alongside the WebSocket route by
/// [`crate::serve_cmd::build_router`].
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/workflows", post(handlers::create_workflow).get(handlers::list_workflows))
        .route("/workflows/active", get(handlers::list_active_workflows))
        .route("/workflows/{id}", get(handlers::get_workflow))
        .route("/workflows/{id}/approve", post(handlers::approve_workflow))
        .route("/workflows/{id}/reject", post(handlers::reject_workflow))
        .route("/workflows/{id}/cancel", post(handlers::cancel_workflow))
        .route("/workflows/{id}/replan", post(handlers::replan_workflow))
        .route("/workflows/{id}/events", get(handlers::get_workflow_events))
}
