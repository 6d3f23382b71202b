//! The concrete graph this crate ships: `architect -> (interrupt:
//! awaiting_plan_approval) -> developer <-> reviewer -> terminal` (spec §4.3).
//!
//! Three thin [`Node`] wrappers delegate all actual work to an
//! [`AgentHooks`] implementation; the graph wiring itself encodes the
//! approval gate and the bounded developer/reviewer loop.

use std::sync::Arc;

use async_trait::async_trait;

use amelia_db::models::PipelineState;

use super::agent_hooks::AgentHooks;
use super::graph::{Edge, Graph, TERMINAL_FAILURE, TERMINAL_SUCCESS};
use super::node::{InterruptKind, Node, ResumePayload, StepResult};
use super::state::StateDelta;

const ARCHITECT: &str = "architect";
const DEVELOPER: &str = "developer";
const REVIEWER: &str = "reviewer";

/// Produces a plan, then always interrupts for approval. On resume (i.e.
/// `approve`, the only orchestrator command that ever calls
/// [`super::Engine::resume`] — `reject` terminates the workflow without
/// touching the engine, spec §4.4) it simply records the decision and
/// continues to `developer`.
struct ArchitectNode {
    hooks: Arc<dyn AgentHooks>,
}

#[async_trait]
impl Node for ArchitectNode {
    fn name(&self) -> &str {
        ARCHITECT
    }

    async fn run(
        &self,
        state: &PipelineState,
        resume: Option<ResumePayload>,
    ) -> anyhow::Result<StepResult> {
        if let Some(payload) = resume {
            let mut delta = StateDelta::new();
            delta.history.push(match &payload.feedback {
                Some(feedback) => format!("architect: plan approved ({feedback})"),
                None => "architect: plan approved".to_string(),
            });
            return Ok(StepResult::Continue(delta));
        }

        let outcome = self.hooks.architect(state).await?;
        let payload = serde_json::json!({ "plan_summary": outcome.plan_summary });
        Ok(StepResult::Interrupt {
            kind: InterruptKind::AwaitingPlanApproval,
            payload,
            delta: outcome.delta,
        })
    }
}

struct DeveloperNode {
    hooks: Arc<dyn AgentHooks>,
}

#[async_trait]
impl Node for DeveloperNode {
    fn name(&self) -> &str {
        DEVELOPER
    }

    async fn run(
        &self,
        state: &PipelineState,
        _resume: Option<ResumePayload>,
    ) -> anyhow::Result<StepResult> {
        let outcome = self.hooks.developer(state).await?;
        Ok(StepResult::Continue(outcome.delta))
    }
}

/// Bumps `iteration` on every rejection, before the edge's max-iterations
/// check — a rejection at `iteration == max_iterations - 1` loops once more,
/// at `iteration == max_iterations` it fails (spec §4.3 edge case).
struct ReviewerNode {
    hooks: Arc<dyn AgentHooks>,
}

#[async_trait]
impl Node for ReviewerNode {
    fn name(&self) -> &str {
        REVIEWER
    }

    async fn run(
        &self,
        state: &PipelineState,
        _resume: Option<ResumePayload>,
    ) -> anyhow::Result<StepResult> {
        let outcome = self.hooks.reviewer(state).await?;
        let mut delta = outcome.delta;
        if matches!(&delta.last_review, Some(review) if !review.approved) {
            delta.bump_iteration = true;
        }
        Ok(StepResult::Continue(delta))
    }
}

/// Build the fixed graph every `Engine` in this crate runs.
pub fn build_implementation_graph(hooks: Arc<dyn AgentHooks>) -> Graph {
    Graph::builder(ARCHITECT)
        .with_node(Arc::new(ArchitectNode { hooks: hooks.clone() }))
        .with_node(Arc::new(DeveloperNode { hooks: hooks.clone() }))
        .with_node(Arc::new(ReviewerNode { hooks }))
        .with_edge(ARCHITECT, Edge::Unconditional(DEVELOPER.to_string()))
        .with_edge(DEVELOPER, Edge::Unconditional(REVIEWER.to_string()))
        .with_edge(
            REVIEWER,
            Edge::Conditional(Box::new(|state: &PipelineState| {
                match &state.last_review {
                    Some(review) if review.approved => TERMINAL_SUCCESS.to_string(),
                    Some(_) if state.iteration >= state.max_iterations => {
                        TERMINAL_FAILURE.to_string()
                    }
                    _ => DEVELOPER.to_string(),
                }
            })),
        )
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::agent_hooks::{AgentOutcome, NoopAgentHooks};
    use amelia_db::models::Review;
    use uuid::Uuid;

    fn state(max_iterations: u32) -> PipelineState {
        PipelineState::new(
            Uuid::new_v4(),
            None,
            "title".into(),
            "desc".into(),
            None,
            max_iterations,
        )
    }

    #[tokio::test]
    async fn architect_always_interrupts_on_fresh_entry() {
        let graph = build_implementation_graph(Arc::new(NoopAgentHooks));
        let node = graph.node(ARCHITECT).unwrap();
        let step = node.run(&state(3), None).await.unwrap();
        assert!(matches!(
            step,
            StepResult::Interrupt { kind: InterruptKind::AwaitingPlanApproval, .. }
        ));
    }

    #[tokio::test]
    async fn architect_continues_unconditionally_on_resume() {
        let graph = build_implementation_graph(Arc::new(NoopAgentHooks));
        let node = graph.node(ARCHITECT).unwrap();
        let step = node
            .run(
                &state(3),
                Some(ResumePayload {
                    approved: true,
                    feedback: None,
                }),
            )
            .await
            .unwrap();
        assert!(matches!(step, StepResult::Continue(_)));
        assert_eq!(graph.edge(ARCHITECT).unwrap().resolve(&state(3)), DEVELOPER);
    }

    struct RejectingHooks;

    #[async_trait]
    impl AgentHooks for RejectingHooks {
        async fn architect(&self, _state: &PipelineState) -> anyhow::Result<AgentOutcome> {
            Ok(AgentOutcome::default())
        }
        async fn developer(&self, _state: &PipelineState) -> anyhow::Result<AgentOutcome> {
            Ok(AgentOutcome::default())
        }
        async fn reviewer(&self, _state: &PipelineState) -> anyhow::Result<AgentOutcome> {
            let mut delta = StateDelta::new();
            delta.last_review = Some(Review {
                approved: false,
                comments: "needs work".into(),
                severity: "major".into(),
            });
            Ok(AgentOutcome { delta, plan_summary: None })
        }
    }

    #[tokio::test]
    async fn reviewer_rejection_bumps_iteration_before_edge_check() {
        let graph = build_implementation_graph(Arc::new(RejectingHooks));
        let node = graph.node(REVIEWER).unwrap();

        let mut st = state(2);
        st.iteration = 0;
        let step = node.run(&st, None).await.unwrap();
        let StepResult::Continue(delta) = step else {
            panic!("expected Continue");
        };
        assert!(delta.bump_iteration);
        delta.merge_into(&mut st);
        assert_eq!(st.iteration, 1);
        assert_eq!(graph.edge(REVIEWER).unwrap().resolve(&st), DEVELOPER);
    }

    #[tokio::test]
    async fn reviewer_rejection_at_max_iterations_routes_to_failure() {
        let graph = build_implementation_graph(Arc::new(RejectingHooks));
        let node = graph.node(REVIEWER).unwrap();

        let mut st = state(1);
        st.iteration = 0;
        let step = node.run(&st, None).await.unwrap();
        let StepResult::Continue(delta) = step else {
            panic!("expected Continue");
        };
        delta.merge_into(&mut st);
        assert_eq!(st.iteration, 1);
        assert_eq!(graph.edge(REVIEWER).unwrap().resolve(&st), TERMINAL_FAILURE);
    }

    #[tokio::test]
    async fn reviewer_approval_routes_to_success() {
        let graph = build_implementation_graph(Arc::new(NoopAgentHooks));
        let node = graph.node(REVIEWER).unwrap();
        let mut st = state(3);
        let step = node.run(&st, None).await.unwrap();
        let StepResult::Continue(delta) = step else {
            panic!("expected Continue");
        };
        delta.merge_into(&mut st);
        assert_eq!(graph.edge(REVIEWER).unwrap().resolve(&st), TERMINAL_SUCCESS);
    }
}
