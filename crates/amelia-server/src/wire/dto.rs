//! Request and response bodies for the `/workflows*` routes. Field names
//! follow spec §3/§6 ("request and response bodies are JSON with the field
//! names documented in §3").

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use amelia_core::NewWorkflowRequest;
use amelia_db::models::{TokenUsageRow, Workflow, WorkflowEvent, WorkflowStatus};

/// How far a freshly created workflow should be allowed to run before an
/// operator decision is required. Not itself a spec §3 field — it picks
/// which of the orchestrator's three creation commands (`queue`,
/// `queue_and_plan`, `create_skip_approval`) this request maps to.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreateMode {
    /// Create the workflow row only; nothing runs until approved elsewhere.
    Pending,
    /// Create and immediately start planning (the default: spec §2's "the
    /// architect node is the first executed").
    #[default]
    Plan,
    /// Create and skip the plan-approval gate entirely (spec §4.4's
    /// "skip-plan-approval start (not default)").
    SkipApproval,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateWorkflowRequest {
    pub issue_id: String,
    pub issue_title: String,
    pub issue_description: String,
    #[serde(default)]
    pub issue_tracker_id: Option<String>,
    pub worktree_path: String,
    #[serde(default)]
    pub worktree_name: Option<String>,
    #[serde(default)]
    pub profile_name: Option<String>,
    #[serde(default)]
    pub max_iterations: Option<u32>,
    #[serde(default)]
    pub mode: CreateMode,
}

impl From<CreateWorkflowRequest> for NewWorkflowRequest {
    fn from(req: CreateWorkflowRequest) -> Self {
        NewWorkflowRequest {
            issue_id: req.issue_id,
            issue_title: req.issue_title,
            issue_description: req.issue_description,
            issue_tracker_id: req.issue_tracker_id,
            worktree_path: req.worktree_path,
            worktree_name: req.worktree_name,
            profile_name: req.profile_name,
            max_iterations: req.max_iterations,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CreateWorkflowResponse {
    pub workflow_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct RejectWorkflowRequest {
    #[serde(default)]
    pub feedback: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListWorkflowsQuery {
    pub status: Option<WorkflowStatus>,
    pub worktree: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    pub cursor: Option<String>,
}

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Serialize)]
pub struct WorkflowListResponse {
    pub items: Vec<Workflow>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
    pub total: i64,
}

/// The `GET /workflows/{id}` detail response: plan summary, latest review,
/// token usage, and recent events alongside the workflow row (spec §4.5).
#[derive(Debug, Serialize)]
pub struct WorkflowDetailResponse {
    #[serde(flatten)]
    pub workflow: Workflow,
    pub token_usage: Vec<TokenUsageRow>,
    pub recent_events: Vec<WorkflowEvent>,
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub after_sequence: i64,
}

#[derive(Debug, Serialize)]
pub struct EventsResponse {
    pub events: Vec<WorkflowEvent>,
}
