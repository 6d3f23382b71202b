//! `Engine`: drives a [`Graph`] to its next interrupt or to a terminal node,
//! checkpointing after every transition (spec §4.3).
//!
//! The loop itself never touches `workflows` — it only knows about
//! checkpoints, the state bag, and events. Turning a `RunOutcome` into a
//! workflow status transition is the orchestrator's job
//! ([`crate::orchestrator`]), the same separation the teacher draws between
//! its DAG scheduler and the task-status bookkeeping layered on top of it.

use std::sync::Arc;

use uuid::Uuid;

use amelia_db::models::{EventType, PipelineState};
use amelia_db::queries::checkpoints::{self, PendingWrite};

use crate::events::{EventBus, EventDraft};

use super::graph::{Graph, TERMINAL_FAILURE, TERMINAL_SUCCESS};
use super::node::{InterruptKind, ResumePayload, StepResult};

/// What a `run`/`resume` call produced once it stopped driving the graph.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed {
        state: PipelineState,
        stage: String,
    },
    Failed {
        state: PipelineState,
        stage: String,
        reason: String,
    },
    Interrupted {
        state: PipelineState,
        stage: String,
        kind: InterruptKind,
        payload: serde_json::Value,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("no checkpoint found for thread {0}")]
    NoCheckpoint(Uuid),

    #[error("thread {0} is not awaiting an interrupt")]
    NotInterrupted(Uuid),

    #[error("thread {0} is awaiting an interrupt, use resume() instead")]
    AlreadyInterrupted(Uuid),

    #[error("node {0:?} has no outgoing edge in the graph")]
    MissingEdge(String),

    #[error("node {0:?} not found in graph")]
    NodeNotFound(String),

    #[error("node {node:?} failed")]
    NodeFailed {
        node: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("pipeline for thread {0} exceeded the maximum of {1} steps")]
    MaxStepsExceeded(Uuid, u32),

    #[error("infrastructure error: {0}")]
    Infrastructure(#[from] anyhow::Error),
}

/// Drives a [`Graph`]. One instance is shared by every workflow; the graph
/// itself carries no per-workflow state, so the same `Engine` can run many
/// threads concurrently.
pub struct Engine {
    pool: sqlx::PgPool,
    events: Arc<EventBus>,
    graph: Arc<Graph>,
    max_steps: u32,
}

impl Engine {
    pub fn new(pool: sqlx::PgPool, events: Arc<EventBus>, graph: Arc<Graph>, max_steps: u32) -> Self {
        Self {
            pool,
            events,
            graph,
            max_steps,
        }
    }

    /// Start a fresh thread at the graph's entry node.
    pub async fn run(&self, initial_state: PipelineState) -> Result<RunOutcome, EngineError> {
        let thread_id = initial_state.workflow_id;
        self.drive(thread_id, self.graph.entry().to_string(), initial_state, None)
            .await
    }

    /// Re-enter the node that raised the most recent interrupt, injecting
    /// `payload`, and continue driving the graph from there.
    pub async fn resume(
        &self,
        thread_id: Uuid,
        payload: ResumePayload,
    ) -> Result<RunOutcome, EngineError> {
        let checkpoint = checkpoints::load_latest(&self.pool, thread_id)
            .await?
            .ok_or(EngineError::NoCheckpoint(thread_id))?;

        if checkpoint.interrupt_kind.is_none() {
            return Err(EngineError::NotInterrupted(thread_id));
        }
        let node_name = checkpoint
            .next_node
            .clone()
            .ok_or(EngineError::NotInterrupted(thread_id))?;
        let state: PipelineState = serde_json::from_value((*checkpoint.state).clone())
            .map_err(|e| EngineError::Infrastructure(e.into()))?;

        self.drive(thread_id, node_name, state, Some(payload)).await
    }

    /// Continue driving a thread from its latest checkpoint without
    /// injecting a resume payload — used for process-restart auto-resume of
    /// an `in_progress` workflow whose checkpoint points at a mid-loop node
    /// (`developer`/`reviewer`), never at an interrupt.
    pub async fn continue_run(&self, thread_id: Uuid) -> Result<RunOutcome, EngineError> {
        let checkpoint = checkpoints::load_latest(&self.pool, thread_id)
            .await?
            .ok_or(EngineError::NoCheckpoint(thread_id))?;

        if checkpoint.interrupt_kind.is_some() {
            return Err(EngineError::AlreadyInterrupted(thread_id));
        }
        let node_name = checkpoint
            .next_node
            .clone()
            .ok_or(EngineError::NoCheckpoint(thread_id))?;
        let state: PipelineState = serde_json::from_value((*checkpoint.state).clone())
            .map_err(|e| EngineError::Infrastructure(e.into()))?;

        self.drive(thread_id, node_name, state, None).await
    }

    /// Apply a delta to a thread's current state outside the normal node
    /// loop (e.g. an orchestrator command recording an out-of-band note) and
    /// persist a new checkpoint preserving the existing `next_node`/
    /// `interrupt_kind` pointer.
    pub async fn update_state(
        &self,
        thread_id: Uuid,
        delta: super::state::StateDelta,
    ) -> Result<PipelineState, EngineError> {
        let checkpoint = checkpoints::load_latest(&self.pool, thread_id)
            .await?
            .ok_or(EngineError::NoCheckpoint(thread_id))?;
        let mut state: PipelineState = serde_json::from_value((*checkpoint.state).clone())
            .map_err(|e| EngineError::Infrastructure(e.into()))?;
        delta.merge_into(&mut state);

        self.checkpoint(
            thread_id,
            &state,
            checkpoint.next_node.as_deref(),
            checkpoint.interrupt_kind.as_deref(),
        )
        .await?;

        Ok(state)
    }

    /// Delete every checkpoint for a thread (a `replan`, spec §4.4).
    pub async fn purge_checkpoints(&self, thread_id: Uuid) -> Result<(), EngineError> {
        checkpoints::delete_all(&self.pool, thread_id).await?;
        Ok(())
    }

    async fn drive(
        &self,
        thread_id: Uuid,
        mut current_node: String,
        mut state: PipelineState,
        mut resume_payload: Option<ResumePayload>,
    ) -> Result<RunOutcome, EngineError> {
        for _ in 0..self.max_steps {
            let node = self
                .graph
                .node(&current_node)
                .ok_or_else(|| EngineError::NodeNotFound(current_node.clone()))?
                .clone();

            self.emit_quiet(EventDraft::new(
                thread_id,
                EventType::StageStarted,
                node.name(),
                format!("{} started", node.name()),
            ))
            .await;

            let outcome = node.run(&state, resume_payload.take()).await;

            let step = match outcome {
                Ok(step) => step,
                Err(source) => {
                    self.emit_quiet(
                        EventDraft::new(
                            thread_id,
                            EventType::StageFailed,
                            node.name(),
                            format!("{} failed: {source}", node.name()),
                        )
                        .with_data(serde_json::json!({ "error": source.to_string() })),
                    )
                    .await;
                    return Err(EngineError::NodeFailed {
                        node: node.name().to_string(),
                        source,
                    });
                }
            };

            match step {
                StepResult::Continue(delta) => {
                    delta.merge_into(&mut state);
                    self.emit_quiet(EventDraft::new(
                        thread_id,
                        EventType::StageCompleted,
                        node.name(),
                        format!("{} completed", node.name()),
                    ))
                    .await;

                    let edge = self
                        .graph
                        .edge(&current_node)
                        .ok_or_else(|| EngineError::MissingEdge(current_node.clone()))?;
                    let next = edge.resolve(&state);

                    self.checkpoint(thread_id, &state, Some(&next), None).await?;

                    if next == TERMINAL_SUCCESS {
                        return Ok(RunOutcome::Completed {
                            state,
                            stage: node.name().to_string(),
                        });
                    }
                    if next == TERMINAL_FAILURE {
                        return Ok(RunOutcome::Failed {
                            state,
                            stage: node.name().to_string(),
                            reason: format!("{} routed to the failure terminal", node.name()),
                        });
                    }
                    current_node = next;
                }
                StepResult::Interrupt {
                    kind,
                    payload,
                    delta,
                } => {
                    delta.merge_into(&mut state);
                    self.checkpoint(
                        thread_id,
                        &state,
                        Some(&current_node),
                        Some(kind.as_str()),
                    )
                    .await?;
                    self.emit_quiet(
                        EventDraft::new(
                            thread_id,
                            EventType::ApprovalRequired,
                            node.name(),
                            format!("{} is awaiting {}", node.name(), kind),
                        )
                        .with_data(payload.clone()),
                    )
                    .await;
                    return Ok(RunOutcome::Interrupted {
                        state,
                        stage: node.name().to_string(),
                        kind,
                        payload,
                    });
                }
            }
        }

        Err(EngineError::MaxStepsExceeded(thread_id, self.max_steps))
    }

    async fn checkpoint(
        &self,
        thread_id: Uuid,
        state: &PipelineState,
        next_node: Option<&str>,
        interrupt_kind: Option<&str>,
    ) -> Result<(), EngineError> {
        let value = serde_json::to_value(state).map_err(|e| EngineError::Infrastructure(e.into()))?;
        checkpoints::save(
            &self.pool,
            thread_id,
            &value,
            next_node,
            interrupt_kind,
            &[] as &[PendingWrite],
        )
        .await?;
        Ok(())
    }

    /// Emit and swallow the error: an event-bus failure must not abort a
    /// pipeline step that otherwise succeeded. The failure is already logged
    /// by `EventBus::emit`'s own instrumentation at the infrastructure layer.
    async fn emit_quiet(&self, draft: EventDraft) {
        if let Err(err) = self.events.emit(draft).await {
            tracing::warn!(%err, "failed to emit pipeline event");
        }
    }
}
