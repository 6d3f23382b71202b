//! Error taxonomy shared by the orchestrator and the pipeline engine.
//!
//! Mirrors the kinds in the spec's error-handling design (validation,
//! invariant violation, not-found, infrastructure) so the wire layer can
//! map each variant to an HTTP status and code string without inspecting
//! string messages.

use uuid::Uuid;

use amelia_db::models::WorkflowStatus;

/// Errors raised by orchestrator commands and the pipeline engine.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// The referenced workflow (or event, or checkpoint thread) does not exist.
    #[error("workflow {0} not found")]
    NotFound(Uuid),

    /// A non-terminal workflow already occupies this worktree.
    #[error("worktree {worktree_path:?} is already in use by workflow {incumbent}")]
    WorktreeConflict {
        worktree_path: String,
        incumbent: Uuid,
    },

    /// The global non-terminal workflow count is at `MAX_CONCURRENT_WORKFLOWS`.
    #[error("concurrency limit reached: {max_concurrent} non-terminal workflows already running")]
    ConcurrencyLimit { max_concurrent: usize },

    /// The command is not valid for the workflow's current status.
    #[error("invalid state for workflow {workflow_id}: in {current:?}, cannot {attempted}")]
    InvalidState {
        workflow_id: Uuid,
        current: WorkflowStatus,
        attempted: &'static str,
    },

    /// A second supervised task was requested for a workflow that already
    /// has one running (e.g. replan while planning is in flight).
    #[error("workflow {0} already has an active supervised task")]
    RunnerConflict(Uuid),

    /// Malformed input caught before it reaches orchestrator invariants.
    #[error("validation error: {0}")]
    Validation(String),

    /// Database, checkpoint store, or other infrastructure failure.
    #[error("infrastructure error: {0}")]
    Infrastructure(#[from] anyhow::Error),
}

impl OrchestratorError {
    /// Stable machine-readable code string, matching the wire layer's
    /// exception-to-code mapping table (spec §4.5, §7).
    pub const fn code(&self) -> &'static str {
        match self {
            OrchestratorError::NotFound(_) => "NOT_FOUND",
            OrchestratorError::WorktreeConflict { .. } | OrchestratorError::RunnerConflict(_) => {
                "WORKFLOW_CONFLICT"
            }
            OrchestratorError::ConcurrencyLimit { .. } => "CONCURRENCY_LIMIT",
            OrchestratorError::InvalidState { .. } => "INVALID_STATE",
            OrchestratorError::Validation(_) => "VALIDATION_ERROR",
            OrchestratorError::Infrastructure(_) => "INTERNAL_ERROR",
        }
    }
}
