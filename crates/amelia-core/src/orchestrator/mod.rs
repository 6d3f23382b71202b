//! The orchestrator: workflow lifecycle authority (spec §4.4).
//!
//! Owns the status state machine ([`state_machine`]), the concurrency and
//! worktree-exclusion invariants, the single in-memory map of supervised
//! tasks ([`running_tasks`]), and the public command surface
//! (`queue`/`queue_and_plan`/`create_skip_approval`/`approve`/`reject`/
//! `replan`/`cancel`/`set_plan`). Mirrors the separation the teacher draws
//! between `run_orchestrator`'s scheduling loop and the task-state
//! bookkeeping layered on top of it, generalized from "one DAG run" to "many
//! independently supervised workflow runs".

pub mod running_tasks;
pub mod state_machine;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use amelia_db::models::{EventType, PipelineState, Workflow, WorkflowStatus};
use amelia_db::queries::workflows::{self, NewWorkflow, WorkflowPage};

use crate::errors::OrchestratorError;
use crate::events::{EventBus, EventDraft};
use crate::pipeline::{AgentHooks, Engine, EngineError, InterruptKind, ResumePayload, RunOutcome, StateDelta};

use running_tasks::{RunningTask, RunningTasks, TaskKind};
use state_machine::WorkflowStateMachine;

/// Tunables read from the environment by `amelia-server` (spec §7) and
/// handed to [`Orchestrator::new`].
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_concurrent_workflows: usize,
    pub max_pipeline_steps: u32,
    pub cancel_grace: Duration,
    pub default_max_iterations: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_workflows: 5,
            max_pipeline_steps: 500,
            cancel_grace: Duration::from_secs(5),
            default_max_iterations: 5,
        }
    }
}

/// Input to `queue`/`queue_and_plan`/`create_skip_approval`. The issue
/// itself is resolved by the caller via a [`crate::contracts::Tracker`]
/// before this point — the orchestrator only ever sees the already-fetched
/// title/description.
#[derive(Debug, Clone)]
pub struct NewWorkflowRequest {
    pub issue_id: String,
    pub issue_title: String,
    pub issue_description: String,
    pub issue_tracker_id: Option<String>,
    pub worktree_path: String,
    pub worktree_name: Option<String>,
    pub profile_name: Option<String>,
    pub max_iterations: Option<u32>,
}

/// The workflow lifecycle authority. One instance per process, `Arc`-shared
/// with every spawned supervised task and with the wire layer.
pub struct Orchestrator {
    pool: sqlx::PgPool,
    events: Arc<EventBus>,
    engine: Arc<Engine>,
    config: OrchestratorConfig,
    running: RunningTasks,
}

impl Orchestrator {
    /// Construct the orchestrator and auto-resume every non-terminal
    /// workflow found in the database (spec §4.4, Open Question #1 —
    /// *this implementation auto-resumes* `planning` and `in_progress`
    /// workflows from their last checkpoint; `blocked` workflows are left
    /// quiescent awaiting an operator's `approve`/`reject`/`replan`).
    pub async fn new(
        pool: sqlx::PgPool,
        events: Arc<EventBus>,
        hooks: Arc<dyn AgentHooks>,
        config: OrchestratorConfig,
    ) -> anyhow::Result<Arc<Self>> {
        let graph = Arc::new(crate::pipeline::implementation_graph::build_implementation_graph(
            hooks,
        ));
        let engine = Arc::new(Engine::new(
            pool.clone(),
            events.clone(),
            graph,
            config.max_pipeline_steps,
        ));

        let orchestrator = Arc::new(Self {
            pool,
            events,
            engine,
            config,
            running: RunningTasks::new(),
        });

        orchestrator.auto_resume().await?;
        Ok(orchestrator)
    }

    async fn auto_resume(self: &Arc<Self>) -> anyhow::Result<()> {
        for workflow in workflows::list_active(&self.pool).await? {
            match workflow.status {
                WorkflowStatus::Planning => {
                    tracing::info!(workflow_id = %workflow.workflow_id, "auto-resuming planning workflow");
                    self.clone().resume_planning(workflow).await;
                }
                WorkflowStatus::InProgress => {
                    tracing::info!(workflow_id = %workflow.workflow_id, "auto-resuming in-progress workflow");
                    self.resume_execution(workflow.workflow_id);
                }
                WorkflowStatus::Blocked => {
                    tracing::info!(workflow_id = %workflow.workflow_id, "leaving blocked workflow quiescent");
                }
                WorkflowStatus::Pending => {
                    // Never had a supervised task; nothing to resume.
                }
                WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled => {
                    unreachable!("list_active excludes terminal workflows")
                }
            }
        }
        Ok(())
    }

    /// A planning workflow found at startup may have already produced its
    /// interrupt checkpoint before the process died between `engine.run`
    /// returning and the `planning -> blocked` transition landing. Detect
    /// that and finish the transition without re-running the architect;
    /// otherwise restart planning from scratch.
    async fn resume_planning(self: Arc<Self>, workflow: Workflow) {
        let id = workflow.workflow_id;
        let checkpoint = amelia_db::queries::checkpoints::load_latest(&self.pool, id)
            .await
            .ok()
            .flatten();

        let already_interrupted = match checkpoint {
            Some(checkpoint) if checkpoint.interrupt_kind.is_some() => {
                serde_json::from_value::<PipelineState>(checkpoint.state.0).ok()
            }
            _ => None,
        };

        match already_interrupted {
            Some(state) => {
                self.finish_planning(
                    id,
                    Ok(RunOutcome::Interrupted {
                        state,
                        stage: "architect".to_string(),
                        kind: InterruptKind::AwaitingPlanApproval,
                        payload: serde_json::Value::Null,
                    }),
                )
                .await;
            }
            None => {
                if self.running.try_insert(id, RunningTask::reserve(TaskKind::Planning)) {
                    self.spawn(id, TaskKind::Planning, move |this, _cancel| async move {
                        this.engine.run(workflow.pipeline_state.0).await
                    });
                }
            }
        }
    }

    fn resume_execution(self: &Arc<Self>, id: Uuid) {
        if !self.running.try_insert(id, RunningTask::reserve(TaskKind::Execution)) {
            return;
        }
        self.spawn(id, TaskKind::Execution, move |this, _cancel| async move {
            this.engine.continue_run(id).await
        });
    }

    // -- command surface -----------------------------------------------

    /// Creates a pending workflow without starting anything.
    pub async fn queue(self: &Arc<Self>, req: NewWorkflowRequest) -> Result<Uuid, OrchestratorError> {
        let (id, _) = self.insert_pending(req).await?;
        Ok(id)
    }

    /// Creates a pending workflow, spawns a planning task, returns.
    pub async fn queue_and_plan(
        self: &Arc<Self>,
        req: NewWorkflowRequest,
    ) -> Result<Uuid, OrchestratorError> {
        let (id, state) = self.insert_pending(req).await?;
        if !self.running.try_insert(id, RunningTask::reserve(TaskKind::Planning)) {
            return Err(OrchestratorError::RunnerConflict(id));
        }
        if let Err(err) = WorkflowStateMachine::transition(
            &self.pool,
            id,
            WorkflowStatus::Pending,
            WorkflowStatus::Planning,
            None,
        )
        .await
        {
            self.running.remove(id);
            return Err(err);
        }
        self.spawn(id, TaskKind::Planning, move |this, _cancel| async move {
            this.engine.run(state).await
        });
        Ok(id)
    }

    /// Creates a pending workflow and immediately starts execution,
    /// skipping the plan-approval gate (spec §4.4's "skip-plan-approval
    /// start (not default)" transition).
    pub async fn create_skip_approval(
        self: &Arc<Self>,
        req: NewWorkflowRequest,
    ) -> Result<Uuid, OrchestratorError> {
        let (id, state) = self.insert_pending(req).await?;
        if !self.running.try_insert(id, RunningTask::reserve(TaskKind::Execution)) {
            return Err(OrchestratorError::RunnerConflict(id));
        }
        if let Err(err) = WorkflowStateMachine::transition(
            &self.pool,
            id,
            WorkflowStatus::Pending,
            WorkflowStatus::InProgress,
            None,
        )
        .await
        {
            self.running.remove(id);
            return Err(err);
        }

        self.spawn(id, TaskKind::Execution, move |this, _cancel| async move {
            // Skip-approval still goes through the interrupt — the graph
            // always raises it — but immediately resumes with an
            // auto-approval instead of waiting on an operator.
            match this.engine.run(state).await {
                Ok(RunOutcome::Interrupted { .. }) => {
                    this.engine
                        .resume(
                            id,
                            ResumePayload {
                                approved: true,
                                feedback: Some("auto-approved: skip_approval".to_string()),
                            },
                        )
                        .await
                }
                other => other,
            }
        });
        Ok(id)
    }

    pub async fn approve(self: &Arc<Self>, id: Uuid) -> Result<(), OrchestratorError> {
        if !self.running.try_insert(id, RunningTask::reserve(TaskKind::Execution)) {
            return Err(OrchestratorError::RunnerConflict(id));
        }
        if let Err(err) = WorkflowStateMachine::transition(
            &self.pool,
            id,
            WorkflowStatus::Blocked,
            WorkflowStatus::InProgress,
            None,
        )
        .await
        {
            self.running.remove(id);
            return Err(err);
        }

        self.emit_best_effort(EventDraft::new(
            id,
            EventType::ApprovalGranted,
            "orchestrator",
            "plan approved",
        ))
        .await;

        self.spawn(id, TaskKind::Execution, move |this, _cancel| async move {
            this.engine
                .resume(
                    id,
                    ResumePayload {
                        approved: true,
                        feedback: None,
                    },
                )
                .await
        });
        Ok(())
    }

    pub async fn reject(&self, id: Uuid, feedback: impl Into<String>) -> Result<(), OrchestratorError> {
        let feedback = feedback.into();
        WorkflowStateMachine::transition(
            &self.pool,
            id,
            WorkflowStatus::Blocked,
            WorkflowStatus::Failed,
            Some(&feedback),
        )
        .await?;

        self.emit_best_effort(
            EventDraft::new(id, EventType::ApprovalRejected, "orchestrator", "plan rejected")
                .with_data(serde_json::json!({ "feedback": feedback })),
        )
        .await;
        Ok(())
    }

    pub async fn replan(self: &Arc<Self>, id: Uuid) -> Result<(), OrchestratorError> {
        if !self.running.try_insert(id, RunningTask::reserve(TaskKind::Planning)) {
            return Err(OrchestratorError::RunnerConflict(id));
        }

        let result = self.do_replan(id).await;
        let state = match result {
            Ok(state) => state,
            Err(err) => {
                self.running.remove(id);
                return Err(err);
            }
        };

        self.emit_best_effort(EventDraft::new(
            id,
            EventType::ReplanStarted,
            "orchestrator",
            "replanning",
        ))
        .await;

        self.spawn(id, TaskKind::Planning, move |this, _cancel| async move {
            this.engine.run(state).await
        });
        Ok(())
    }

    async fn do_replan(&self, id: Uuid) -> Result<PipelineState, OrchestratorError> {
        self.engine
            .purge_checkpoints(id)
            .await
            .map_err(|e: EngineError| OrchestratorError::Infrastructure(e.into()))?;

        let workflow = workflows::get(&self.pool, id)
            .await
            .map_err(OrchestratorError::Infrastructure)?
            .ok_or(OrchestratorError::NotFound(id))?;
        let mut state = workflow.pipeline_state.0;
        state.clear_plan();
        workflows::update_pipeline_state(&self.pool, id, &state, None)
            .await
            .map_err(OrchestratorError::Infrastructure)?;
        workflows::clear_plan_cache(&self.pool, id)
            .await
            .map_err(OrchestratorError::Infrastructure)?;

        WorkflowStateMachine::transition(
            &self.pool,
            id,
            WorkflowStatus::Blocked,
            WorkflowStatus::Planning,
            None,
        )
        .await?;

        Ok(state)
    }

    /// Signals the supervised task to cancel, waits up to
    /// `config.cancel_grace`, then forces the `cancelled` transition
    /// regardless of whether the task acknowledged in time (spec §4.4,
    /// §5 — the orphaned task is left to fail on its own next
    /// cancellation-aware await point).
    pub async fn cancel(&self, id: Uuid) -> Result<(), OrchestratorError> {
        let workflow = workflows::get(&self.pool, id)
            .await
            .map_err(OrchestratorError::Infrastructure)?
            .ok_or(OrchestratorError::NotFound(id))?;

        if workflow.status.is_terminal() {
            return Err(OrchestratorError::InvalidState {
                workflow_id: id,
                current: workflow.status,
                attempted: "transition_to_cancelled",
            });
        }

        if let Some(running) = self.running.remove(id) {
            running.cancel.cancel();
            if let Some(handle) = running.handle.lock().await.take() {
                let _ = tokio::time::timeout(self.config.cancel_grace, handle).await;
            }
        }

        WorkflowStateMachine::transition(&self.pool, id, workflow.status, WorkflowStatus::Cancelled, None)
            .await?;

        self.emit_best_effort(EventDraft::new(
            id,
            EventType::WorkflowCancelled,
            "orchestrator",
            "workflow cancelled",
        ))
        .await;
        Ok(())
    }

    /// Administrative: inject a pre-baked plan into a `blocked` workflow's
    /// pipeline state so the next `approve` resumes with it (spec §4.4).
    pub async fn set_plan(&self, id: Uuid, plan_markdown: impl Into<String>) -> Result<(), OrchestratorError> {
        let plan_markdown = plan_markdown.into();
        let workflow = workflows::get(&self.pool, id)
            .await
            .map_err(OrchestratorError::Infrastructure)?
            .ok_or(OrchestratorError::NotFound(id))?;
        if workflow.status != WorkflowStatus::Blocked {
            return Err(OrchestratorError::InvalidState {
                workflow_id: id,
                current: workflow.status,
                attempted: "set_plan",
            });
        }

        let mut delta = StateDelta::new();
        delta.plan_markdown = Some(plan_markdown.clone());
        let state = self
            .engine
            .update_state(id, delta)
            .await
            .map_err(|e| OrchestratorError::Infrastructure(e.into()))?;

        let summary = plan_markdown
            .lines()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("")
            .trim_start_matches('#')
            .trim()
            .to_string();
        workflows::update_pipeline_state(&self.pool, id, &state, None)
            .await
            .map_err(OrchestratorError::Infrastructure)?;
        workflows::update_plan_cache(&self.pool, id, &plan_markdown, &summary)
            .await
            .map_err(OrchestratorError::Infrastructure)?;
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Workflow, OrchestratorError> {
        workflows::get(&self.pool, id)
            .await
            .map_err(OrchestratorError::Infrastructure)?
            .ok_or(OrchestratorError::NotFound(id))
    }

    pub async fn list(
        &self,
        status: Option<WorkflowStatus>,
        worktree: Option<&str>,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<WorkflowPage, OrchestratorError> {
        workflows::list(&self.pool, status, worktree, limit, cursor)
            .await
            .map_err(OrchestratorError::Infrastructure)
    }

    pub async fn list_active(&self) -> Result<Vec<Workflow>, OrchestratorError> {
        workflows::list_active(&self.pool)
            .await
            .map_err(OrchestratorError::Infrastructure)
    }

    // -- internals -------------------------------------------------------

    async fn insert_pending(
        &self,
        req: NewWorkflowRequest,
    ) -> Result<(Uuid, PipelineState), OrchestratorError> {
        if req.issue_id.trim().is_empty() {
            return Err(OrchestratorError::Validation("issue_id must not be empty".into()));
        }
        if !req.worktree_path.starts_with('/') {
            return Err(OrchestratorError::Validation(
                "worktree_path must be an absolute path".into(),
            ));
        }

        if let Some(incumbent) = workflows::get_by_worktree(&self.pool, &req.worktree_path)
            .await
            .map_err(OrchestratorError::Infrastructure)?
        {
            return Err(OrchestratorError::WorktreeConflict {
                worktree_path: req.worktree_path,
                incumbent: incumbent.workflow_id,
            });
        }

        let active = workflows::count_active(&self.pool)
            .await
            .map_err(OrchestratorError::Infrastructure)?;
        if active as usize >= self.config.max_concurrent_workflows {
            return Err(OrchestratorError::ConcurrencyLimit {
                max_concurrent: self.config.max_concurrent_workflows,
            });
        }

        let id = Uuid::new_v4();
        let max_iterations = req.max_iterations.unwrap_or(self.config.default_max_iterations);
        let state = PipelineState::new(
            id,
            req.profile_name.clone(),
            req.issue_title,
            req.issue_description,
            req.issue_tracker_id,
            max_iterations,
        );

        workflows::create(
            &self.pool,
            &NewWorkflow {
                workflow_id: id,
                issue_id: req.issue_id,
                worktree_path: req.worktree_path,
                worktree_name: req.worktree_name,
                profile_name: req.profile_name,
                status: WorkflowStatus::Pending,
                pipeline_state: state.clone(),
            },
        )
        .await
        .map_err(OrchestratorError::Infrastructure)?;

        self.emit_best_effort(EventDraft::new(
            id,
            EventType::WorkflowCreated,
            "orchestrator",
            "workflow created",
        ))
        .await;

        Ok((id, state))
    }

    /// Spawn a supervised task for an already-reserved `(id, kind)` slot,
    /// filling in its handle once `tokio::spawn` returns, and routing the
    /// result through [`Self::finish_planning`]/[`Self::finish_execution`]
    /// depending on `kind`. `cancel` is passed to `work` so long node runs
    /// could select against it; the concrete nodes in this crate do not
    /// yet have a natural mid-node cancellation point, so cancellation
    /// currently takes effect between pipeline steps (spec §5's bounded
    /// grace period still applies via `cancel()`'s timeout).
    fn spawn<F, Fut>(self: &Arc<Self>, id: Uuid, kind: TaskKind, work: F)
    where
        F: FnOnce(Arc<Self>, CancellationToken) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<RunOutcome, EngineError>> + Send + 'static,
    {
        let this = self.clone();
        let cancel = self.running.cancel_token(id).unwrap_or_default();
        let slot = self.running.handle_slot(id);
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            let outcome = tokio::select! {
                outcome = work(this.clone(), task_cancel) => outcome,
                _ = cancel.cancelled() => return,
            };
            match kind {
                TaskKind::Planning => this.finish_planning(id, outcome).await,
                TaskKind::Execution => this.finish_execution(id, outcome).await,
            }
        });
        if let Some(slot) = slot {
            if let Ok(mut guard) = slot.try_lock() {
                *guard = Some(handle);
            }
        }
    }

    async fn finish_planning(&self, id: Uuid, outcome: Result<RunOutcome, EngineError>) {
        self.running.remove(id);
        match outcome {
            Ok(RunOutcome::Interrupted { state, stage, payload, .. }) => {
                let _ = workflows::update_pipeline_state(&self.pool, id, &state, Some(&stage)).await;
                let summary = payload
                    .get("plan_summary")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                let plan_markdown = state.plan_markdown.clone().unwrap_or_default();
                let _ = workflows::update_plan_cache(&self.pool, id, &plan_markdown, &summary).await;
                let _ = WorkflowStateMachine::transition(
                    &self.pool,
                    id,
                    WorkflowStatus::Planning,
                    WorkflowStatus::Blocked,
                    None,
                )
                .await;
            }
            Ok(RunOutcome::Completed { state, stage }) => {
                let _ = workflows::update_pipeline_state(&self.pool, id, &state, Some(&stage)).await;
                let _ = WorkflowStateMachine::transition(
                    &self.pool,
                    id,
                    WorkflowStatus::Planning,
                    WorkflowStatus::Completed,
                    None,
                )
                .await;
            }
            Ok(RunOutcome::Failed { state, stage, reason }) => {
                let _ = workflows::update_pipeline_state(&self.pool, id, &state, Some(&stage)).await;
                let _ = WorkflowStateMachine::transition(
                    &self.pool,
                    id,
                    WorkflowStatus::Planning,
                    WorkflowStatus::Failed,
                    Some(&reason),
                )
                .await;
            }
            Err(err) => {
                tracing::error!(workflow_id = %id, %err, "planning task failed");
                let _ = WorkflowStateMachine::transition(
                    &self.pool,
                    id,
                    WorkflowStatus::Planning,
                    WorkflowStatus::Failed,
                    Some(&err.to_string()),
                )
                .await;
            }
        }
    }

    async fn finish_execution(&self, id: Uuid, outcome: Result<RunOutcome, EngineError>) {
        self.running.remove(id);
        match outcome {
            Ok(RunOutcome::Completed { state, stage }) => {
                let _ = workflows::update_pipeline_state(&self.pool, id, &state, Some(&stage)).await;
                let _ = WorkflowStateMachine::transition(
                    &self.pool,
                    id,
                    WorkflowStatus::InProgress,
                    WorkflowStatus::Completed,
                    None,
                )
                .await;
                self.emit_best_effort(EventDraft::new(
                    id,
                    EventType::WorkflowCompleted,
                    "orchestrator",
                    "workflow completed",
                ))
                .await;
            }
            Ok(RunOutcome::Failed { state, stage, reason }) => {
                let _ = workflows::update_pipeline_state(&self.pool, id, &state, Some(&stage)).await;
                let _ = WorkflowStateMachine::transition(
                    &self.pool,
                    id,
                    WorkflowStatus::InProgress,
                    WorkflowStatus::Failed,
                    Some(&reason),
                )
                .await;
                self.emit_best_effort(
                    EventDraft::new(id, EventType::WorkflowFailed, "orchestrator", reason.clone())
                        .with_data(serde_json::json!({ "reason": reason })),
                )
                .await;
            }
            Ok(RunOutcome::Interrupted { .. }) => {
                tracing::error!(workflow_id = %id, "execution task hit an unexpected interrupt");
                let _ = WorkflowStateMachine::transition(
                    &self.pool,
                    id,
                    WorkflowStatus::InProgress,
                    WorkflowStatus::Failed,
                    Some("unexpected interrupt during execution"),
                )
                .await;
            }
            Err(err) => {
                tracing::error!(workflow_id = %id, %err, "execution task failed");
                let _ = WorkflowStateMachine::transition(
                    &self.pool,
                    id,
                    WorkflowStatus::InProgress,
                    WorkflowStatus::Failed,
                    Some(&err.to_string()),
                )
                .await;
            }
        }
    }

    async fn emit_best_effort(&self, draft: EventDraft) {
        if let Err(err) = self.events.emit(draft).await {
            tracing::warn!(%err, "failed to emit orchestrator event");
        }
    }
}
