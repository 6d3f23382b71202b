//! `amelia log` command: show the event log for a workflow.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use amelia_db::models::WorkflowEvent;
use amelia_db::queries::events;
use amelia_db::queries::workflows;

/// Run the log command. With `after_sequence` set, only events with a
/// strictly greater `sequence` are shown (mirrors `GET
/// /workflows/{id}/events?after_sequence=N`, spec §4.5).
pub async fn run_log(pool: &PgPool, workflow_id_str: &str, after_sequence: Option<i64>) -> Result<()> {
    let workflow_id = Uuid::parse_str(workflow_id_str)
        .with_context(|| format!("invalid workflow ID: {workflow_id_str}"))?;

    let workflow = workflows::get(pool, workflow_id)
        .await?
        .with_context(|| format!("workflow {workflow_id} not found"))?;

    println!("Workflow: {} ({})", workflow.issue_id, workflow.workflow_id);
    println!("Status: {}", workflow.status);
    println!();

    let events: Vec<WorkflowEvent> = events::get_since(pool, workflow_id, after_sequence.unwrap_or(0)).await?;

    if events.is_empty() {
        println!("No events recorded.");
        return Ok(());
    }

    println!("Events ({}):", events.len());
    for event in &events {
        let time = event.timestamp.format("%H:%M:%S%.3f");
        let summary = summarize_event(&event);
        println!("  [{time}] #{} [{}] {}: {summary}", event.sequence, event.agent, event.event_type);
    }

    Ok(())
}

/// Generate a one-line summary from an event's type and message/payload.
fn summarize_event(event: &WorkflowEvent) -> String {
    if !event.message.is_empty() {
        return truncate(&event.message, 80);
    }

    match &event.data.0 {
        serde_json::Value::Null => String::new(),
        other => truncate(&other.to_string(), 80),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() > max {
        format!("{}...", &s[..max - 3])
    } else {
        s.to_string()
    }
}
