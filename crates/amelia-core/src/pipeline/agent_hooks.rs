//! `AgentHooks`: the seam between the pipeline engine and the (explicitly
//! out-of-scope, spec §1) architect/developer/reviewer agents.
//!
//! The core "invokes them as opaque async functions that read/mutate a
//! pipeline state bag" (spec §1). Concretely this is one object-safe trait,
//! the same shape as [`crate::contracts::Driver`] and the teacher's
//! `Harness` trait: a single implementation is injected into the concrete
//! node structs at graph-construction time, so swapping in a real
//! architect/developer/reviewer implementation never touches the engine or
//! the orchestrator.

use async_trait::async_trait;

use amelia_db::models::PipelineState;

use super::state::StateDelta;

/// What one agent turn produces: a [`StateDelta`] to merge, plus the
/// cached plan text the architect alone populates (spec §3's "Approval
/// cache"). Other agents leave `plan_summary` `None`.
#[derive(Debug, Clone, Default)]
pub struct AgentOutcome {
    pub delta: StateDelta,
    pub plan_summary: Option<String>,
}

/// The architect/developer/reviewer contract a concrete pipeline node calls
/// into. Each method reads the current state bag and returns the delta that
/// node should apply; none of them interpret the engine's interrupt/resume
/// machinery directly — that stays in [`super::implementation_graph`].
#[async_trait]
pub trait AgentHooks: Send + Sync {
    async fn architect(&self, state: &PipelineState) -> anyhow::Result<AgentOutcome>;
    async fn developer(&self, state: &PipelineState) -> anyhow::Result<AgentOutcome>;
    async fn reviewer(&self, state: &PipelineState) -> anyhow::Result<AgentOutcome>;
}

/// A hook set with no agent behavior: the architect produces an empty
/// one-task plan, the developer marks that task done, and the reviewer
/// always approves. Used by tests and by any deployment that has not yet
/// wired a real agent implementation (mirrors the teacher's
/// `NoopHarness`/`FakeHarness` test pattern, spec §4.6).
#[derive(Debug, Default)]
pub struct NoopAgentHooks;

#[async_trait]
impl AgentHooks for NoopAgentHooks {
    async fn architect(&self, _state: &PipelineState) -> anyhow::Result<AgentOutcome> {
        let mut delta = StateDelta::new();
        delta.goal = Some("noop goal".into());
        delta.plan_markdown = Some("# Plan\n\n1. do the thing".into());
        delta.tasks = Some(vec![amelia_db::models::Task {
            id: "t1".into(),
            title: "do the thing".into(),
            status: amelia_db::models::TaskStatus::Pending,
        }]);
        delta.history.push("architect: produced a one-task noop plan".into());
        Ok(AgentOutcome {
            delta,
            plan_summary: Some("noop plan: do the thing".into()),
        })
    }

    async fn developer(&self, _state: &PipelineState) -> anyhow::Result<AgentOutcome> {
        let mut delta = StateDelta::new();
        delta.task_status_updates.push(("t1".into(), amelia_db::models::TaskStatus::Done));
        delta.history.push("developer: completed t1".into());
        Ok(AgentOutcome { delta, plan_summary: None })
    }

    async fn reviewer(&self, _state: &PipelineState) -> anyhow::Result<AgentOutcome> {
        let mut delta = StateDelta::new();
        delta.last_review = Some(amelia_db::models::Review {
            approved: true,
            comments: "looks fine".into(),
            severity: "none".into(),
        });
        delta.history.push("reviewer: approved".into());
        Ok(AgentOutcome { delta, plan_summary: None })
    }
}
