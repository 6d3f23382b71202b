//! `amelia status` command: show workflow progress and per-task status.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use amelia_db::queries::workflows;

/// Run the status command.
///
/// When `workflow_id_str` is `Some`, shows detailed status for that
/// workflow. When `None`, lists active workflows with a progress summary.
pub async fn run_status(pool: &PgPool, workflow_id_str: Option<&str>) -> Result<()> {
    match workflow_id_str {
        Some(id_str) => run_workflow_status(pool, id_str).await,
        None => run_fleet_status(pool).await,
    }
}

/// Show detailed status for a single workflow.
async fn run_workflow_status(pool: &PgPool, workflow_id_str: &str) -> Result<()> {
    let workflow_id = Uuid::parse_str(workflow_id_str)
        .with_context(|| format!("invalid workflow ID: {workflow_id_str}"))?;

    let workflow = workflows::get(pool, workflow_id)
        .await?
        .with_context(|| format!("workflow {workflow_id} not found"))?;

    println!("Workflow: {} ({})", workflow.issue_id, workflow.workflow_id);
    println!("Status: {}", workflow.status);
    if let Some(stage) = &workflow.current_stage {
        println!("Stage: {stage}");
    }
    println!("Worktree: {}", workflow.worktree_path);
    if let Some(reason) = &workflow.failure_reason {
        println!("Failure: {reason}");
    }
    println!();

    let state = &workflow.pipeline_state.0;
    if let Some(goal) = &state.goal {
        println!("Goal: {goal}");
    }
    println!(
        "Progress: {}/{} tasks, iteration {}/{}",
        state.tasks.iter().filter(|t| t.status == amelia_db::models::TaskStatus::Done).count(),
        state.tasks_total,
        state.iteration,
        state.max_iterations,
    );
    println!();

    println!("Tasks:");
    for task in &state.tasks {
        let status_icon = match task.status {
            amelia_db::models::TaskStatus::Pending => ".",
            amelia_db::models::TaskStatus::Running => "*",
            amelia_db::models::TaskStatus::Done => "+",
            amelia_db::models::TaskStatus::Failed => "!",
        };
        println!("  [{status_icon}] {} ({})", task.title, task.status);
    }

    Ok(())
}

/// List active workflows with a progress summary.
async fn run_fleet_status(pool: &PgPool) -> Result<()> {
    let active = workflows::list_active(pool).await?;

    if active.is_empty() {
        println!("No active workflows.");
        return Ok(());
    }

    println!(
        "{:<38} {:<24} {:<14} {:>10}",
        "ID", "ISSUE", "STATUS", "PROGRESS"
    );
    println!("{}", "-".repeat(90));

    for workflow in &active {
        let state = &workflow.pipeline_state.0;
        let done = state.tasks.iter().filter(|t| t.status == amelia_db::models::TaskStatus::Done).count();
        let progress_str = if state.tasks_total > 0 {
            format!("{done}/{}", state.tasks_total)
        } else {
            "0/0".to_string()
        };
        let issue_display = if workflow.issue_id.len() > 22 {
            format!("{}...", &workflow.issue_id[..19])
        } else {
            workflow.issue_id.clone()
        };
        println!(
            "{:<38} {:<24} {:<14} {:>10}",
            workflow.workflow_id, issue_display, workflow.status, progress_str
        );
    }

    Ok(())
}
