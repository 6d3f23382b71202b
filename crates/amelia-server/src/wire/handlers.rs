//! Route handlers for `/workflows*` (spec §4.5). Each handler validates its
//! input, calls one `Orchestrator` command, and maps the result through
//! [`AppError`]. Read endpoints that need more than the orchestrator's
//! command surface exposes (recent events, token usage) query
//! `amelia_db::queries` directly, the way the teacher's handlers query
//! `gator_db::queries` straight from `serve_cmd.rs` rather than through an
//! intermediate service layer.

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use uuid::Uuid;

use amelia_core::OrchestratorError;
use amelia_db::queries::{events, token_usage};

use crate::AppState;

use super::dto::{
    CreateMode, CreateWorkflowRequest, CreateWorkflowResponse, EventsQuery, EventsResponse,
    ListWorkflowsQuery, RejectWorkflowRequest, WorkflowDetailResponse, WorkflowListResponse,
};
use super::validation;
use super::AppError;

const RECENT_EVENTS_LIMIT: i64 = 50;

pub async fn create_workflow(
    State(state): State<AppState>,
    Json(req): Json<CreateWorkflowRequest>,
) -> Result<Response, AppError> {
    validation::validate_issue_id(&req.issue_id)?;
    let worktree_path = validation::validate_worktree_path(&req.worktree_path)?;
    if let Some(profile) = &req.profile_name {
        validation::validate_identifier("profile_name", profile)?;
    }

    let mode = req.mode;
    let mut new_req: amelia_core::NewWorkflowRequest = req.into();
    new_req.worktree_path = worktree_path;

    let workflow_id = match mode {
        CreateMode::Pending => state.orchestrator.queue(new_req).await?,
        CreateMode::Plan => state.orchestrator.queue_and_plan(new_req).await?,
        CreateMode::SkipApproval => state.orchestrator.create_skip_approval(new_req).await?,
    };

    Ok((
        axum::http::StatusCode::CREATED,
        Json(CreateWorkflowResponse { workflow_id }),
    )
        .into_response())
}

pub async fn list_workflows(
    State(state): State<AppState>,
    Query(query): Query<ListWorkflowsQuery>,
) -> Result<Json<WorkflowListResponse>, AppError> {
    let page = state
        .orchestrator
        .list(query.status, query.worktree.as_deref(), query.limit, query.cursor.as_deref())
        .await?;

    Ok(Json(WorkflowListResponse {
        items: page.items,
        next_cursor: page.next_cursor,
        has_more: page.has_more,
        total: page.total,
    }))
}

pub async fn list_active_workflows(
    State(state): State<AppState>,
) -> Result<Json<Vec<amelia_db::models::Workflow>>, AppError> {
    let items = state.orchestrator.list_active().await?;
    Ok(Json(items))
}

pub async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<WorkflowDetailResponse>, AppError> {
    let workflow = state.orchestrator.get(id).await?;

    let token_usage = token_usage::get_for_workflow(&state.pool, id)
        .await
        .map_err(OrchestratorError::Infrastructure)?;
    let recent_events = events::get_recent(&state.pool, id, RECENT_EVENTS_LIMIT)
        .await
        .map_err(OrchestratorError::Infrastructure)?;

    Ok(Json(WorkflowDetailResponse {
        workflow,
        token_usage,
        recent_events,
    }))
}

pub async fn approve_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<axum::http::StatusCode, AppError> {
    state.orchestrator.approve(id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

pub async fn reject_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<RejectWorkflowRequest>>,
) -> Result<axum::http::StatusCode, AppError> {
    let feedback = body.and_then(|Json(b)| b.feedback).unwrap_or_default();
    state.orchestrator.reject(id, feedback).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

pub async fn cancel_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<axum::http::StatusCode, AppError> {
    state.orchestrator.cancel(id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

pub async fn replan_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<axum::http::StatusCode, AppError> {
    state.orchestrator.replan(id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

pub async fn get_workflow_events(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<EventsResponse>, AppError> {
    // Touch the orchestrator first so an unknown workflow_id surfaces as
    // NOT_FOUND instead of an empty event list.
    state.orchestrator.get(id).await?;

    let events = events::get_since(&state.pool, id, query.after_sequence)
        .await
        .map_err(OrchestratorError::Infrastructure)?;

    Ok(Json(EventsResponse { events }))
}
