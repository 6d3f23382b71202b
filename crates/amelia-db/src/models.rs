//! Row and value types shared by every `amelia-db` query module.
//!
//! Enums that round-trip through Postgres follow the same shape throughout:
//! stored as `text`, with a hand-written `Display`/`FromStr` pair and a
//! dedicated parse-error type, so a corrupt value surfaces as a typed error
//! rather than a panic deep in a query.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a [`Workflow`], exactly the state machine in the
/// orchestrator's transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Planning,
    InProgress,
    Blocked,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    /// All three states a workflow can never leave.
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled
        )
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkflowStatus::Pending => "pending",
            WorkflowStatus::Planning => "planning",
            WorkflowStatus::InProgress => "in_progress",
            WorkflowStatus::Blocked => "blocked",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid workflow status: {0:?}")]
pub struct WorkflowStatusParseError(String);

impl FromStr for WorkflowStatus {
    type Err = WorkflowStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(WorkflowStatus::Pending),
            "planning" => Ok(WorkflowStatus::Planning),
            "in_progress" => Ok(WorkflowStatus::InProgress),
            "blocked" => Ok(WorkflowStatus::Blocked),
            "completed" => Ok(WorkflowStatus::Completed),
            "failed" => Ok(WorkflowStatus::Failed),
            "cancelled" => Ok(WorkflowStatus::Cancelled),
            other => Err(WorkflowStatusParseError(other.to_owned())),
        }
    }
}

/// Status of a single task inside [`PipelineState::tasks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Done,
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid task status: {0:?}")]
pub struct TaskStatusParseError(String);

impl FromStr for TaskStatus {
    type Err = TaskStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "done" => Ok(TaskStatus::Done),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(TaskStatusParseError(other.to_owned())),
        }
    }
}

/// The enumerated event types a workflow can emit.
///
/// `agent_message`, `agent_thinking`, `tool_call`, and `tool_result` are
/// ephemeral: streamed live to subscribers but never written to
/// `workflow_events` and never assigned a `sequence`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    WorkflowCreated,
    WorkflowStarted,
    WorkflowCompleted,
    WorkflowFailed,
    WorkflowCancelled,
    StageStarted,
    StageCompleted,
    StageFailed,
    ApprovalRequired,
    ApprovalGranted,
    ApprovalRejected,
    ReplanStarted,
    ReviewCompleted,
    TaskStarted,
    TaskCompleted,
    TaskFailed,
    TokenUsageUpdated,
    AgentMessage,
    AgentThinking,
    ToolCall,
    ToolResult,
}

impl EventType {
    /// Ephemeral event types are streamed but never persisted and never
    /// consume a `sequence` number (spec §3, §6).
    pub const fn is_ephemeral(self) -> bool {
        matches!(
            self,
            EventType::AgentMessage
                | EventType::AgentThinking
                | EventType::ToolCall
                | EventType::ToolResult
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventType::WorkflowCreated => "workflow_created",
            EventType::WorkflowStarted => "workflow_started",
            EventType::WorkflowCompleted => "workflow_completed",
            EventType::WorkflowFailed => "workflow_failed",
            EventType::WorkflowCancelled => "workflow_cancelled",
            EventType::StageStarted => "stage_started",
            EventType::StageCompleted => "stage_completed",
            EventType::StageFailed => "stage_failed",
            EventType::ApprovalRequired => "approval_required",
            EventType::ApprovalGranted => "approval_granted",
            EventType::ApprovalRejected => "approval_rejected",
            EventType::ReplanStarted => "replan_started",
            EventType::ReviewCompleted => "review_completed",
            EventType::TaskStarted => "task_started",
            EventType::TaskCompleted => "task_completed",
            EventType::TaskFailed => "task_failed",
            EventType::TokenUsageUpdated => "token_usage_updated",
            EventType::AgentMessage => "agent_message",
            EventType::AgentThinking => "agent_thinking",
            EventType::ToolCall => "tool_call",
            EventType::ToolResult => "tool_result",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid event type: {0:?}")]
pub struct EventTypeParseError(String);

impl FromStr for EventType {
    type Err = EventTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "workflow_created" => Ok(EventType::WorkflowCreated),
            "workflow_started" => Ok(EventType::WorkflowStarted),
            "workflow_completed" => Ok(EventType::WorkflowCompleted),
            "workflow_failed" => Ok(EventType::WorkflowFailed),
            "workflow_cancelled" => Ok(EventType::WorkflowCancelled),
            "stage_started" => Ok(EventType::StageStarted),
            "stage_completed" => Ok(EventType::StageCompleted),
            "stage_failed" => Ok(EventType::StageFailed),
            "approval_required" => Ok(EventType::ApprovalRequired),
            "approval_granted" => Ok(EventType::ApprovalGranted),
            "approval_rejected" => Ok(EventType::ApprovalRejected),
            "replan_started" => Ok(EventType::ReplanStarted),
            "review_completed" => Ok(EventType::ReviewCompleted),
            "task_started" => Ok(EventType::TaskStarted),
            "task_completed" => Ok(EventType::TaskCompleted),
            "task_failed" => Ok(EventType::TaskFailed),
            "token_usage_updated" => Ok(EventType::TokenUsageUpdated),
            "agent_message" => Ok(EventType::AgentMessage),
            "agent_thinking" => Ok(EventType::AgentThinking),
            "tool_call" => Ok(EventType::ToolCall),
            "tool_result" => Ok(EventType::ToolResult),
            other => Err(EventTypeParseError(other.to_owned())),
        }
    }
}

/// A single task inside the pipeline's task list. Order is significant and
/// preserved by storing these in a `Vec`, never a map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
}

/// The latest reviewer verdict. Only the most recent one drives orchestrator
/// decisions; the full history lives in `workflow_events`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub approved: bool,
    pub comments: String,
    pub severity: String,
}

/// Running token/cost totals for a single agent, as carried inside the
/// embedded state bag (a fast-read snapshot; the `token_usage` table is
/// authoritative).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsageEntry {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
    pub estimated_cost_usd: f64,
}

impl TokenUsageEntry {
    pub fn add(&mut self, input: i64, output: i64, cost_usd: f64) {
        self.input_tokens += input;
        self.output_tokens += output;
        self.total_tokens += input + output;
        self.estimated_cost_usd += cost_usd;
    }
}

/// A free-form tool invocation record, appended to `PipelineState::tool_calls`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool_name: String,
    pub agent: String,
    pub input: serde_json::Value,
    pub output: Option<serde_json::Value>,
}

/// A record of an oracle consultation, appended to
/// `PipelineState::oracle_consultations`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleConsultation {
    pub question: String,
    pub answer: String,
}

/// The typed state bag threaded through the pipeline graph (spec §3, §4.3).
///
/// Stored embedded on the `workflows` row as JSONB — a materialized view of
/// the latest checkpoint for fast reads. The checkpoint store remains
/// authoritative for resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    pub workflow_id: Uuid,
    pub profile_id: Option<String>,
    pub driver_session_id: Option<String>,

    pub issue_title: String,
    pub issue_description: String,
    pub issue_tracker_id: Option<String>,

    pub plan_markdown: Option<String>,
    pub goal: Option<String>,
    pub tasks_total: u32,
    pub tasks: Vec<Task>,

    pub last_review: Option<Review>,

    pub iteration: u32,
    pub max_iterations: u32,

    pub token_usage: HashMap<String, TokenUsageEntry>,

    pub tool_calls: Vec<ToolCallRecord>,
    pub oracle_consultations: Vec<OracleConsultation>,
    pub history: Vec<String>,
}

impl PipelineState {
    /// Build the initial state bag for a freshly created or replanned
    /// workflow. `tasks`, `plan_markdown`, and `goal` start empty — they are
    /// populated by the architect node.
    pub fn new(
        workflow_id: Uuid,
        profile_id: Option<String>,
        issue_title: String,
        issue_description: String,
        issue_tracker_id: Option<String>,
        max_iterations: u32,
    ) -> Self {
        Self {
            workflow_id,
            profile_id,
            driver_session_id: None,
            issue_title,
            issue_description,
            issue_tracker_id,
            plan_markdown: None,
            goal: None,
            tasks_total: 0,
            tasks: Vec::new(),
            last_review: None,
            iteration: 0,
            max_iterations,
            token_usage: HashMap::new(),
            tool_calls: Vec::new(),
            oracle_consultations: Vec::new(),
            history: Vec::new(),
        }
    }

    /// Reset the fields a replan clears, per spec §4.4 `replan`: `goal`,
    /// `plan_markdown`, and the task list are cleared. Token usage and
    /// history are the workflow's audit trail, not "the plan", and survive.
    pub fn clear_plan(&mut self) {
        self.goal = None;
        self.plan_markdown = None;
        self.tasks_total = 0;
        self.tasks.clear();
        self.last_review = None;
        self.iteration = 0;
    }
}

/// One row in the `workflows` table — the aggregate root (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub workflow_id: Uuid,
    pub issue_id: String,
    pub worktree_path: String,
    pub worktree_name: Option<String>,
    pub status: WorkflowStatus,
    pub current_stage: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub planned_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub profile_name: Option<String>,
    pub pipeline_state: sqlx::types::Json<PipelineState>,
    pub plan_markdown: Option<String>,
    pub plan_summary: Option<String>,
}

/// One row in `workflow_events` (persisted events only; spec §3, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub event_id: Uuid,
    pub workflow_id: Uuid,
    pub sequence: i64,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub agent: String,
    pub message: String,
    pub data: sqlx::types::Json<serde_json::Value>,
}

/// One row in `token_usage`: running sums per `(workflow_id, agent)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsageRow {
    pub workflow_id: Uuid,
    pub agent: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
    pub estimated_cost_usd: f64,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_status_display_roundtrip() {
        for s in [
            WorkflowStatus::Pending,
            WorkflowStatus::Planning,
            WorkflowStatus::InProgress,
            WorkflowStatus::Blocked,
            WorkflowStatus::Completed,
            WorkflowStatus::Failed,
            WorkflowStatus::Cancelled,
        ] {
            let parsed: WorkflowStatus = s.to_string().parse().unwrap();
            assert_eq!(parsed, s);
        }
    }

    #[test]
    fn workflow_status_invalid() {
        assert!("bogus".parse::<WorkflowStatus>().is_err());
    }

    #[test]
    fn workflow_status_terminal() {
        assert!(WorkflowStatus::Completed.is_terminal());
        assert!(WorkflowStatus::Failed.is_terminal());
        assert!(WorkflowStatus::Cancelled.is_terminal());
        assert!(!WorkflowStatus::Pending.is_terminal());
        assert!(!WorkflowStatus::Blocked.is_terminal());
    }

    #[test]
    fn task_status_display_roundtrip() {
        for s in [
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Done,
            TaskStatus::Failed,
        ] {
            let parsed: TaskStatus = s.to_string().parse().unwrap();
            assert_eq!(parsed, s);
        }
    }

    #[test]
    fn task_status_invalid() {
        assert!("bogus".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn event_type_display_roundtrip() {
        let all = [
            EventType::WorkflowCreated,
            EventType::WorkflowStarted,
            EventType::WorkflowCompleted,
            EventType::WorkflowFailed,
            EventType::WorkflowCancelled,
            EventType::StageStarted,
            EventType::StageCompleted,
            EventType::StageFailed,
            EventType::ApprovalRequired,
            EventType::ApprovalGranted,
            EventType::ApprovalRejected,
            EventType::ReplanStarted,
            EventType::ReviewCompleted,
            EventType::TaskStarted,
            EventType::TaskCompleted,
            EventType::TaskFailed,
            EventType::TokenUsageUpdated,
            EventType::AgentMessage,
            EventType::AgentThinking,
            EventType::ToolCall,
            EventType::ToolResult,
        ];
        for e in all {
            let parsed: EventType = e.to_string().parse().unwrap();
            assert_eq!(parsed, e);
        }
    }

    #[test]
    fn event_type_invalid() {
        assert!("bogus".parse::<EventType>().is_err());
    }

    #[test]
    fn ephemeral_classification() {
        assert!(EventType::AgentMessage.is_ephemeral());
        assert!(EventType::AgentThinking.is_ephemeral());
        assert!(EventType::ToolCall.is_ephemeral());
        assert!(EventType::ToolResult.is_ephemeral());
        assert!(!EventType::WorkflowCreated.is_ephemeral());
        assert!(!EventType::TokenUsageUpdated.is_ephemeral());
    }

    #[test]
    fn clear_plan_resets_plan_fields_only() {
        let mut state = PipelineState::new(
            Uuid::new_v4(),
            Some("default".into()),
            "Fix bug".into(),
            "details".into(),
            None,
            5,
        );
        state.goal = Some("ship it".into());
        state.plan_markdown = Some("# plan".into());
        state.tasks_total = 3;
        state.tasks.push(Task {
            id: "t1".into(),
            title: "do thing".into(),
            status: TaskStatus::Done,
        });
        state.iteration = 2;
        state
            .token_usage
            .entry("developer".into())
            .or_default()
            .add(10, 20, 0.01);

        state.clear_plan();

        assert!(state.goal.is_none());
        assert!(state.plan_markdown.is_none());
        assert_eq!(state.tasks_total, 0);
        assert!(state.tasks.is_empty());
        assert_eq!(state.iteration, 0);
        // Token usage is audit history, not plan state - survives replan.
        assert_eq!(state.token_usage["developer"].total_tokens, 30);
    }
}
