//! `WorkflowStateMachine`: the allowed status transitions (spec §4.4),
//! mirroring the teacher's `TaskStateMachine` shape — a validated transition
//! graph plus an optimistic-locked database update, the database row's
//! actual status substituted into the error when the lock fails.

use amelia_db::models::WorkflowStatus;
use amelia_db::queries::workflows;
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::OrchestratorError;

pub struct WorkflowStateMachine;

impl WorkflowStateMachine {
    /// The full transition table (spec §4.4). `in_progress -> in_progress`
    /// is listed explicitly: an internal developer/reviewer iteration is a
    /// no-op at the status level, but it is still a transition the pipeline
    /// engine's supervised task is allowed to attempt.
    pub const fn is_valid_transition(from: WorkflowStatus, to: WorkflowStatus) -> bool {
        use WorkflowStatus::*;
        matches!(
            (from, to),
            (Pending, Planning)
                | (Pending, InProgress)
                | (Pending, Cancelled)
                | (Planning, Blocked)
                | (Planning, Failed)
                | (Planning, Cancelled)
                | (Blocked, Planning)
                | (Blocked, InProgress)
                | (Blocked, Failed)
                | (Blocked, Cancelled)
                | (InProgress, InProgress)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (InProgress, Cancelled)
        )
    }

    /// Validate and apply a transition. On optimistic-lock failure (someone
    /// else already moved the row, or it never existed), reloads the
    /// current row so the caller gets an accurate `InvalidState`/`NotFound`.
    pub async fn transition(
        pool: &PgPool,
        id: Uuid,
        from: WorkflowStatus,
        to: WorkflowStatus,
        failure_reason: Option<&str>,
    ) -> Result<(), OrchestratorError> {
        if !Self::is_valid_transition(from, to) {
            return Err(OrchestratorError::InvalidState {
                workflow_id: id,
                current: from,
                attempted: attempted_label(to),
            });
        }

        let rows = workflows::transition_status(pool, id, from, to, failure_reason)
            .await
            .map_err(OrchestratorError::Infrastructure)?;

        if rows == 0 {
            let current = workflows::get(pool, id)
                .await
                .map_err(OrchestratorError::Infrastructure)?
                .ok_or(OrchestratorError::NotFound(id))?;
            return Err(OrchestratorError::InvalidState {
                workflow_id: id,
                current: current.status,
                attempted: attempted_label(to),
            });
        }

        Ok(())
    }
}

/// A static label for the error's `attempted` field — one per destination
/// status, since `OrchestratorError::InvalidState::attempted` is `&'static
/// str` and the offending `to` is already recorded via this label's name.
const fn attempted_label(to: WorkflowStatus) -> &'static str {
    use WorkflowStatus::*;
    match to {
        Pending => "transition_to_pending",
        Planning => "transition_to_planning",
        InProgress => "transition_to_in_progress",
        Blocked => "transition_to_blocked",
        Completed => "transition_to_completed",
        Failed => "transition_to_failed",
        Cancelled => "transition_to_cancelled",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use WorkflowStatus::*;

    #[test]
    fn happy_path_transitions_are_valid() {
        assert!(WorkflowStateMachine::is_valid_transition(Pending, Planning));
        assert!(WorkflowStateMachine::is_valid_transition(Planning, Blocked));
        assert!(WorkflowStateMachine::is_valid_transition(Blocked, InProgress));
        assert!(WorkflowStateMachine::is_valid_transition(InProgress, Completed));
    }

    #[test]
    fn replan_transition_is_valid() {
        assert!(WorkflowStateMachine::is_valid_transition(Blocked, Planning));
    }

    #[test]
    fn internal_iteration_is_a_self_loop() {
        assert!(WorkflowStateMachine::is_valid_transition(InProgress, InProgress));
    }

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        for terminal in [Completed, Failed, Cancelled] {
            for to in [Pending, Planning, InProgress, Blocked, Completed, Failed, Cancelled] {
                assert!(!WorkflowStateMachine::is_valid_transition(terminal, to));
            }
        }
    }

    #[test]
    fn skipping_blocked_is_invalid() {
        assert!(!WorkflowStateMachine::is_valid_transition(Planning, InProgress));
        assert!(!WorkflowStateMachine::is_valid_transition(Pending, Blocked));
    }
}
