//! Database query functions for the `token_usage` table.
//!
//! One row per `(workflow_id, agent)`: running sums maintained by the token
//! usage sink subscriber (spec §3, §4.1).

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::TokenUsageRow;

/// Fold a token delta into the running total for `(workflow_id, agent)`,
/// creating the row on first use.
pub async fn increment(
    pool: &PgPool,
    workflow_id: Uuid,
    agent: &str,
    input_tokens: i64,
    output_tokens: i64,
    cost_usd: f64,
) -> Result<TokenUsageRow> {
    let row = sqlx::query_as::<_, TokenUsageRow>(
        "INSERT INTO token_usage (workflow_id, agent, input_tokens, output_tokens, total_tokens, estimated_cost_usd, updated_at) \
         VALUES ($1, $2, $3, $4, $3 + $4, $5, NOW()) \
         ON CONFLICT (workflow_id, agent) DO UPDATE SET \
             input_tokens = token_usage.input_tokens + EXCLUDED.input_tokens, \
             output_tokens = token_usage.output_tokens + EXCLUDED.output_tokens, \
             total_tokens = token_usage.total_tokens + EXCLUDED.total_tokens, \
             estimated_cost_usd = token_usage.estimated_cost_usd + EXCLUDED.estimated_cost_usd, \
             updated_at = NOW() \
         RETURNING *",
    )
    .bind(workflow_id)
    .bind(agent)
    .bind(input_tokens)
    .bind(output_tokens)
    .bind(cost_usd)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to increment token usage for {workflow_id}/{agent}"))?;

    Ok(row)
}

/// All per-agent token usage rows for a workflow.
pub async fn get_for_workflow(pool: &PgPool, workflow_id: Uuid) -> Result<Vec<TokenUsageRow>> {
    let rows = sqlx::query_as::<_, TokenUsageRow>(
        "SELECT * FROM token_usage WHERE workflow_id = $1 ORDER BY agent",
    )
    .bind(workflow_id)
    .fetch_all(pool)
    .await
    .with_context(|| format!("failed to fetch token usage for workflow {workflow_id}"))?;

    Ok(rows)
}
