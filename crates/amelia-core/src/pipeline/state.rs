//! `StateDelta`: the typed, named-field answer to Design Note "Dynamic
//! polymorphism" (spec §9). A node never mutates [`PipelineState`]
//! directly — it returns a delta, and the engine applies it with
//! [`StateDelta::merge_into`] after persisting a checkpoint. No reflection,
//! no freeform dict merge.

use amelia_db::models::{OracleConsultation, PipelineState, Review, Task, ToolCallRecord};

/// A set of changes a node wants applied to the state bag. Every field is
/// optional; `None`/empty means "leave unchanged". List fields are
/// append-only, matching `PipelineState`'s own append-only lists.
#[derive(Debug, Clone, Default)]
pub struct StateDelta {
    pub driver_session_id: Option<String>,
    pub plan_markdown: Option<String>,
    pub goal: Option<String>,
    /// Replaces the task list wholesale (the architect produces the full
    /// set at once; nothing partially updates individual tasks here —
    /// task status transitions come from `task_started`/`task_completed`
    /// events applied as their own, smaller deltas).
    pub tasks: Option<Vec<Task>>,
    pub task_status_updates: Vec<(String, amelia_db::models::TaskStatus)>,
    pub last_review: Option<Review>,
    /// `Some(true)` bumps `iteration` by one (a reviewer rejection that
    /// sends the loop back to the developer).
    pub bump_iteration: bool,
    pub token_delta: Option<(String, i64, i64, f64)>,
    pub tool_calls: Vec<ToolCallRecord>,
    pub oracle_consultations: Vec<OracleConsultation>,
    pub history: Vec<String>,
}

impl StateDelta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply this delta onto `state` in place.
    pub fn merge_into(self, state: &mut PipelineState) {
        if let Some(session_id) = self.driver_session_id {
            state.driver_session_id = Some(session_id);
        }
        if let Some(plan_markdown) = self.plan_markdown {
            state.plan_markdown = Some(plan_markdown);
        }
        if let Some(goal) = self.goal {
            state.goal = Some(goal);
        }
        if let Some(tasks) = self.tasks {
            state.tasks_total = tasks.len() as u32;
            state.tasks = tasks;
        }
        for (task_id, status) in self.task_status_updates {
            if let Some(task) = state.tasks.iter_mut().find(|t| t.id == task_id) {
                task.status = status;
            }
        }
        if let Some(review) = self.last_review {
            state.last_review = Some(review);
        }
        if self.bump_iteration {
            state.iteration += 1;
        }
        if let Some((agent, input, output, cost)) = self.token_delta {
            state.token_usage.entry(agent).or_default().add(input, output, cost);
        }
        state.tool_calls.extend(self.tool_calls);
        state.oracle_consultations.extend(self.oracle_consultations);
        state.history.extend(self.history);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amelia_db::models::TaskStatus;
    use uuid::Uuid;

    fn fresh_state() -> PipelineState {
        PipelineState::new(Uuid::new_v4(), None, "title".into(), "desc".into(), None, 3)
    }

    #[test]
    fn merges_plan_fields_and_sets_task_count() {
        let mut state = fresh_state();
        let mut delta = StateDelta::new();
        delta.goal = Some("ship the feature".into());
        delta.plan_markdown = Some("# Plan".into());
        delta.tasks = Some(vec![
            Task { id: "t1".into(), title: "one".into(), status: TaskStatus::Pending },
            Task { id: "t2".into(), title: "two".into(), status: TaskStatus::Pending },
        ]);
        delta.merge_into(&mut state);

        assert_eq!(state.goal.as_deref(), Some("ship the feature"));
        assert_eq!(state.tasks_total, 2);
        assert_eq!(state.tasks.len(), 2);
    }

    #[test]
    fn task_status_updates_target_by_id_without_reordering() {
        let mut state = fresh_state();
        state.tasks = vec![
            Task { id: "t1".into(), title: "one".into(), status: TaskStatus::Pending },
            Task { id: "t2".into(), title: "two".into(), status: TaskStatus::Pending },
        ];
        let mut delta = StateDelta::new();
        delta.task_status_updates.push(("t2".into(), TaskStatus::Done));
        delta.merge_into(&mut state);

        assert_eq!(state.tasks[0].status, TaskStatus::Pending);
        assert_eq!(state.tasks[1].status, TaskStatus::Done);
        assert_eq!(state.tasks[0].id, "t1");
    }

    #[test]
    fn bump_iteration_and_token_delta_accumulate() {
        let mut state = fresh_state();
        let mut delta = StateDelta::new();
        delta.bump_iteration = true;
        delta.token_delta = Some(("developer".into(), 10, 5, 0.02));
        delta.merge_into(&mut state);

        let mut delta2 = StateDelta::new();
        delta2.token_delta = Some(("developer".into(), 1, 1, 0.001));
        delta2.merge_into(&mut state);

        assert_eq!(state.iteration, 1);
        let usage = &state.token_usage["developer"];
        assert_eq!(usage.input_tokens, 11);
        assert_eq!(usage.output_tokens, 6);
    }

    #[test]
    fn append_only_lists_accumulate_across_merges() {
        let mut state = fresh_state();
        let mut delta = StateDelta::new();
        delta.history.push("architect started".into());
        delta.merge_into(&mut state);

        let mut delta2 = StateDelta::new();
        delta2.history.push("architect finished".into());
        delta2.merge_into(&mut state);

        assert_eq!(state.history, vec!["architect started", "architect finished"]);
    }
}
