//! Operator CLI verbs that drive the `Orchestrator` directly (spec §3's
//! command surface): create, approve, reject, replan, cancel, and
//! set-plan. Each builds a short-lived `Orchestrator` over the resolved
//! pool rather than starting the HTTP server, the way the teacher's
//! `Commands::Approve`/`Reject`/`Retry` arms call `gator_core::state::dispatch`
//! functions straight from `main`.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use amelia_core::events::EventBus;
use amelia_core::pipeline::agent_hooks::NoopAgentHooks;
use amelia_core::{NewWorkflowRequest, Orchestrator, OrchestratorConfig};

/// Build an `Orchestrator` for a single CLI invocation. The CLI never
/// subscribes a token-usage sink or WebSocket broker — those only matter to
/// long-lived connections, which `amelia serve` owns.
async fn orchestrator_for_cli(pool: PgPool, config: OrchestratorConfig) -> Result<Arc<Orchestrator>> {
    let events = Arc::new(EventBus::new(pool.clone()));
    Orchestrator::new(pool, events, Arc::new(NoopAgentHooks), config)
        .await
        .context("failed to construct orchestrator")
}

pub struct CreateArgs {
    pub issue_id: String,
    pub issue_title: String,
    pub issue_description: String,
    pub issue_tracker_id: Option<String>,
    pub worktree_path: String,
    pub worktree_name: Option<String>,
    pub profile_name: Option<String>,
    pub max_iterations: Option<u32>,
    pub skip_approval: bool,
    pub no_plan: bool,
}

pub async fn run_create(pool: PgPool, config: OrchestratorConfig, args: CreateArgs) -> Result<()> {
    let orchestrator = orchestrator_for_cli(pool, config).await?;

    let request = NewWorkflowRequest {
        issue_id: args.issue_id,
        issue_title: args.issue_title,
        issue_description: args.issue_description,
        issue_tracker_id: args.issue_tracker_id,
        worktree_path: args.worktree_path,
        worktree_name: args.worktree_name,
        profile_name: args.profile_name,
        max_iterations: args.max_iterations,
    };

    let workflow_id = if args.skip_approval {
        orchestrator.create_skip_approval(request).await?
    } else if args.no_plan {
        orchestrator.queue(request).await?
    } else {
        orchestrator.queue_and_plan(request).await?
    };

    println!("Workflow {workflow_id} created.");
    Ok(())
}

pub async fn run_approve(pool: PgPool, config: OrchestratorConfig, workflow_id_str: &str) -> Result<()> {
    let workflow_id = parse_id(workflow_id_str)?;
    let orchestrator = orchestrator_for_cli(pool, config).await?;
    orchestrator.approve(workflow_id).await?;
    println!("Workflow {workflow_id} approved.");
    Ok(())
}

pub async fn run_reject(
    pool: PgPool,
    config: OrchestratorConfig,
    workflow_id_str: &str,
    feedback: Option<String>,
) -> Result<()> {
    let workflow_id = parse_id(workflow_id_str)?;
    let orchestrator = orchestrator_for_cli(pool, config).await?;
    orchestrator.reject(workflow_id, feedback.unwrap_or_default()).await?;
    println!("Workflow {workflow_id} rejected.");
    Ok(())
}

pub async fn run_replan(pool: PgPool, config: OrchestratorConfig, workflow_id_str: &str) -> Result<()> {
    let workflow_id = parse_id(workflow_id_str)?;
    let orchestrator = orchestrator_for_cli(pool, config).await?;
    orchestrator.replan(workflow_id).await?;
    println!("Workflow {workflow_id} replanning.");
    Ok(())
}

pub async fn run_cancel(pool: PgPool, config: OrchestratorConfig, workflow_id_str: &str) -> Result<()> {
    let workflow_id = parse_id(workflow_id_str)?;
    let orchestrator = orchestrator_for_cli(pool, config).await?;
    orchestrator.cancel(workflow_id).await?;
    println!("Workflow {workflow_id} cancelled.");
    Ok(())
}

pub async fn run_set_plan(
    pool: PgPool,
    config: OrchestratorConfig,
    workflow_id_str: &str,
    plan_markdown: String,
) -> Result<()> {
    let workflow_id = parse_id(workflow_id_str)?;
    let orchestrator = orchestrator_for_cli(pool, config).await?;
    orchestrator.set_plan(workflow_id, plan_markdown).await?;
    println!("Workflow {workflow_id} plan updated.");
    Ok(())
}

fn parse_id(workflow_id_str: &str) -> Result<Uuid> {
    Uuid::parse_str(workflow_id_str).with_context(|| format!("invalid workflow ID: {workflow_id_str}"))
}
