//! `Node`: a single step in the pipeline graph (spec §4.3, Glossary).
//!
//! Mirrors the object-safe adapter shape of
//! [`crate::contracts::Driver`]/[`HarnessRegistry`](../../../../examples) —
//! concrete node types are stored as `Arc<dyn Node>` in the graph's node
//! registry. A node never mutates [`PipelineState`] directly: it returns a
//! [`StepResult`], which is either a [`StateDelta`] to merge in, or a typed
//! interrupt the engine must persist and surface to the caller.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use amelia_db::models::PipelineState;

use super::state::StateDelta;

/// The typed pause points a node can request (spec §3, §4.3, Glossary).
/// Currently the only one in the concrete implementation graph is plan
/// approval, but the type is open so future nodes can add their own without
/// touching the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptKind {
    AwaitingPlanApproval,
}

impl InterruptKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            InterruptKind::AwaitingPlanApproval => "awaiting_plan_approval",
        }
    }
}

impl std::fmt::Display for InterruptKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The payload a caller hands back to [`super::Engine::resume`] to
/// re-enter a node that previously requested an interrupt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumePayload {
    pub approved: bool,
    pub feedback: Option<String>,
}

/// What a node's `run` call produces: either a delta to merge into the
/// state bag and continue, or a request to pause the pipeline (spec §4.3,
/// Design Note "Coroutine control flow and interrupts"). This is a normal
/// enum variant, not a `Result::Err` — interrupts are not failures.
///
/// `Interrupt` still carries a [`StateDelta`]: the work a node did before
/// requesting the pause (e.g. the architect's plan) must be merged and
/// checkpointed alongside the interrupt marker, so a `blocked` workflow's
/// cached plan reflects what the architect actually produced.
#[derive(Debug, Clone)]
pub enum StepResult {
    Continue(StateDelta),
    Interrupt {
        kind: InterruptKind,
        payload: serde_json::Value,
        delta: StateDelta,
    },
}

/// A single step in the pipeline graph.
///
/// Object-safe: every method takes and returns concrete or boxed types, so
/// nodes are stored as `Arc<dyn Node>` in a [`super::graph::Graph`]'s node
/// registry, the same shape as `HarnessRegistry`/`DriverRegistry`.
#[async_trait]
pub trait Node: Send + Sync {
    /// Stable identifier used as this node's key in the graph registry and
    /// as the `agent` label on the `stage_started`/`stage_completed`/
    /// `stage_failed` events it must emit (spec §4.3 "Per-node contract").
    fn name(&self) -> &str;

    /// Run one step. `resume` is `Some` only when the engine is re-entering
    /// a node that previously returned `StepResult::Interrupt` for this
    /// transition; otherwise the node is being entered fresh.
    async fn run(
        &self,
        state: &PipelineState,
        resume: Option<ResumePayload>,
    ) -> anyhow::Result<StepResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_kind_display() {
        assert_eq!(
            InterruptKind::AwaitingPlanApproval.to_string(),
            "awaiting_plan_approval"
        );
    }
}
