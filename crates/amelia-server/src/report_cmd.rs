//! `amelia report` command: show token usage and duration report for a
//! workflow.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use amelia_db::queries::{token_usage, workflows};

/// Run the report command.
pub async fn run_report(pool: &PgPool, workflow_id_str: &str) -> Result<()> {
    let workflow_id = Uuid::parse_str(workflow_id_str)
        .with_context(|| format!("invalid workflow ID: {workflow_id_str}"))?;

    let workflow = workflows::get(pool, workflow_id)
        .await?
        .with_context(|| format!("workflow {workflow_id} not found"))?;

    println!("Workflow: {} ({})", workflow.issue_id, workflow.workflow_id);
    println!("Status: {}", workflow.status);

    if let (Some(started), Some(completed)) = (workflow.started_at, workflow.completed_at) {
        let duration = completed - started;
        let secs = duration.num_seconds();
        println!("Duration: {}m {}s", secs / 60, secs % 60);
    }
    println!();

    let rows = token_usage::get_for_workflow(pool, workflow_id).await?;

    if rows.is_empty() {
        println!("No token usage recorded.");
        return Ok(());
    }

    let mut total_input = 0i64;
    let mut total_output = 0i64;
    let mut total_cost = 0f64;

    println!(
        "{:<20} {:>12} {:>12} {:>12} {:>12}",
        "AGENT", "INPUT", "OUTPUT", "TOTAL", "COST (USD)"
    );
    println!("{}", "-".repeat(72));

    for row in &rows {
        total_input += row.input_tokens;
        total_output += row.output_tokens;
        total_cost += row.estimated_cost_usd;

        println!(
            "{:<20} {:>12} {:>12} {:>12} {:>12.4}",
            row.agent, row.input_tokens, row.output_tokens, row.total_tokens, row.estimated_cost_usd
        );
    }

    println!("{}", "-".repeat(72));
    println!(
        "{:<20} {:>12} {:>12} {:>12} {:>12.4}",
        "total",
        total_input,
        total_output,
        total_input + total_output,
        total_cost
    );

    Ok(())
}
