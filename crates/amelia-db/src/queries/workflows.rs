//! Database query functions for the `workflows` table.

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{PipelineState, Workflow, WorkflowStatus};

/// Parameters for creating a new workflow row.
#[derive(Debug, Clone)]
pub struct NewWorkflow {
    pub workflow_id: Uuid,
    pub issue_id: String,
    pub worktree_path: String,
    pub worktree_name: Option<String>,
    pub profile_name: Option<String>,
    pub status: WorkflowStatus,
    pub pipeline_state: PipelineState,
}

/// Insert a new workflow row. Returns the inserted row with server-generated
/// defaults (`created_at`).
pub async fn create(pool: &PgPool, new: &NewWorkflow) -> Result<Workflow> {
    let workflow = sqlx::query_as::<_, Workflow>(
        "INSERT INTO workflows \
            (workflow_id, issue_id, worktree_path, worktree_name, profile_name, status, pipeline_state) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         RETURNING *",
    )
    .bind(new.workflow_id)
    .bind(&new.issue_id)
    .bind(&new.worktree_path)
    .bind(&new.worktree_name)
    .bind(&new.profile_name)
    .bind(new.status)
    .bind(sqlx::types::Json(&new.pipeline_state))
    .fetch_one(pool)
    .await
    .context("failed to insert workflow")?;

    Ok(workflow)
}

/// Fetch a single workflow by ID.
pub async fn get(pool: &PgPool, id: Uuid) -> Result<Option<Workflow>> {
    let workflow = sqlx::query_as::<_, Workflow>("SELECT * FROM workflows WHERE workflow_id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch workflow")?;

    Ok(workflow)
}

/// Return the workflow currently occupying `worktree_path`, if its status is
/// non-terminal. Used to enforce worktree exclusion (spec §4.4 invariant 1).
pub async fn get_by_worktree(pool: &PgPool, worktree_path: &str) -> Result<Option<Workflow>> {
    let workflow = sqlx::query_as::<_, Workflow>(
        "SELECT * FROM workflows \
         WHERE worktree_path = $1 \
           AND status NOT IN ('completed', 'failed', 'cancelled') \
         LIMIT 1",
    )
    .bind(worktree_path)
    .fetch_optional(pool)
    .await
    .context("failed to fetch workflow by worktree")?;

    Ok(workflow)
}

/// All non-terminal workflows, used both to enforce the concurrency cap and
/// to drive startup auto-resume.
pub async fn list_active(pool: &PgPool) -> Result<Vec<Workflow>> {
    let workflows = sqlx::query_as::<_, Workflow>(
        "SELECT * FROM workflows \
         WHERE status NOT IN ('completed', 'failed', 'cancelled') \
         ORDER BY created_at ASC",
    )
    .fetch_all(pool)
    .await
    .context("failed to list active workflows")?;

    Ok(workflows)
}

/// Count of non-terminal workflows, for the `MAX_CONCURRENT` check.
pub async fn count_active(pool: &PgPool) -> Result<i64> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM workflows \
         WHERE status NOT IN ('completed', 'failed', 'cancelled')",
    )
    .fetch_one(pool)
    .await
    .context("failed to count active workflows")?;

    Ok(row.0)
}

/// Opaque pagination cursor: the `(started_at, workflow_id)` tie-break tuple
/// from the last row of the previous page, base64-encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Cursor {
    started_at: Option<DateTime<Utc>>,
    workflow_id: Uuid,
}

impl Cursor {
    fn encode(&self) -> String {
        let json = serde_json::to_vec(self).expect("cursor serializes");
        URL_SAFE_NO_PAD.encode(json)
    }

    fn decode(raw: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(raw)
            .context("cursor is not valid base64")?;
        serde_json::from_slice(&bytes).context("cursor is not valid JSON")
    }
}

/// A page of workflows plus pagination metadata.
#[derive(Debug, Clone)]
pub struct WorkflowPage {
    pub items: Vec<Workflow>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
    pub total: i64,
}

/// List workflows with optional status/worktree filters and cursor
/// pagination over `(started_at DESC, workflow_id DESC)`.
pub async fn list(
    pool: &PgPool,
    status: Option<WorkflowStatus>,
    worktree: Option<&str>,
    limit: i64,
    cursor: Option<&str>,
) -> Result<WorkflowPage> {
    let cursor = cursor.map(Cursor::decode).transpose()?;

    // sqlx's query! macro needs compile-time DB access; build the filtered
    // query dynamically instead, mirroring the teacher's hand-assembled
    // WHERE clauses for optional filters.
    let mut sql = String::from("SELECT * FROM workflows WHERE 1 = 1");
    let mut count_sql = String::from("SELECT COUNT(*) FROM workflows WHERE 1 = 1");
    let mut bind_idx = 1;
    let mut clauses: Vec<String> = Vec::new();

    if status.is_some() {
        clauses.push(format!("status = ${bind_idx}"));
        bind_idx += 1;
    }
    if worktree.is_some() {
        clauses.push(format!("worktree_path = ${bind_idx}"));
        bind_idx += 1;
    }
    for clause in &clauses {
        sql.push_str(" AND ");
        sql.push_str(clause);
        count_sql.push_str(" AND ");
        count_sql.push_str(clause);
    }

    // `ORDER BY started_at DESC NULLS LAST` puts every `pending` workflow
    // (started_at IS NULL) after every started one. A plain tuple
    // comparison `(started_at, workflow_id) < (cursor_ts, cursor_id)` is
    // three-valued-logic NULL whenever either side is NULL, so it would
    // silently drop the entire NULLS-LAST tail once a cursor crossed into
    // it (or entirely, once the cursor itself came from that tail). Spell
    // out the two cases the NULLS LAST order actually implies instead.
    if let Some(c) = &cursor {
        match c.started_at {
            Some(_) => sql.push_str(&format!(
                " AND ((started_at IS NOT NULL \
                        AND (started_at < ${bind_idx} \
                             OR (started_at = ${bind_idx} AND workflow_id < ${}))) \
                       OR started_at IS NULL)",
                bind_idx + 1
            )),
            None => sql.push_str(&format!(" AND (started_at IS NULL AND workflow_id < ${bind_idx})")),
        }
    }
    sql.push_str(" ORDER BY started_at DESC NULLS LAST, workflow_id DESC");
    sql.push_str(&format!(" LIMIT {}", limit + 1));

    let mut query = sqlx::query_as::<_, Workflow>(&sql);
    let mut count_query = sqlx::query_as::<_, (i64,)>(&count_sql);
    if let Some(s) = status {
        query = query.bind(s);
        count_query = count_query.bind(s);
    }
    if let Some(w) = worktree {
        query = query.bind(w);
        count_query = count_query.bind(w);
    }
    if let Some(c) = &cursor {
        match c.started_at {
            Some(ts) => query = query.bind(ts).bind(c.workflow_id),
            None => query = query.bind(c.workflow_id),
        }
    }

    let mut items = query
        .fetch_all(pool)
        .await
        .context("failed to list workflows")?;
    let total = count_query
        .fetch_one(pool)
        .await
        .context("failed to count workflows")?
        .0;

    let has_more = items.len() as i64 > limit;
    if has_more {
        items.truncate(limit as usize);
    }
    let next_cursor = if has_more {
        items.last().map(|w| {
            Cursor {
                started_at: w.started_at,
                workflow_id: w.workflow_id,
            }
            .encode()
        })
    } else {
        None
    };

    Ok(WorkflowPage {
        items,
        next_cursor,
        has_more,
        total,
    })
}

/// Atomically transition a workflow from one status to another, optionally
/// recording a failure reason and stamping the phase timestamp that
/// transition implies. Optimistic-locked on `status = from`: a 0-row result
/// means someone else already moved the workflow, which the orchestrator
/// treats as an invalid-state conflict.
pub async fn transition_status(
    pool: &PgPool,
    id: Uuid,
    from: WorkflowStatus,
    to: WorkflowStatus,
    failure_reason: Option<&str>,
) -> Result<u64> {
    let now = Utc::now();
    let result = sqlx::query(
        "UPDATE workflows \
         SET status = $1, \
             failure_reason = COALESCE($2, failure_reason), \
             started_at = CASE WHEN $1 = 'in_progress' AND started_at IS NULL THEN $3 ELSE started_at END, \
             planned_at = CASE WHEN $1 = 'blocked' THEN $3 ELSE planned_at END, \
             completed_at = CASE WHEN $1 IN ('completed', 'failed', 'cancelled') THEN $3 ELSE completed_at END \
         WHERE workflow_id = $4 AND status = $5",
    )
    .bind(to)
    .bind(failure_reason)
    .bind(now)
    .bind(id)
    .bind(from)
    .execute(pool)
    .await
    .context("failed to transition workflow status")?;

    Ok(result.rows_affected())
}

/// Overwrite the embedded pipeline-state snapshot and, optionally, the
/// `current_stage` label. Called after every pipeline-engine checkpoint so
/// `workflows` stays a fast-read materialized view of the latest state.
pub async fn update_pipeline_state(
    pool: &PgPool,
    id: Uuid,
    state: &PipelineState,
    current_stage: Option<&str>,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE workflows \
         SET pipeline_state = $1, current_stage = COALESCE($2, current_stage) \
         WHERE workflow_id = $3",
    )
    .bind(sqlx::types::Json(state))
    .bind(current_stage)
    .bind(id)
    .execute(pool)
    .await
    .context("failed to update pipeline state")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("workflow {id} not found");
    }
    Ok(())
}

/// Cache the plan text on the workflow row for fast retrieval while the
/// workflow is `blocked` awaiting approval.
pub async fn update_plan_cache(
    pool: &PgPool,
    id: Uuid,
    plan_markdown: &str,
    plan_summary: &str,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE workflows SET plan_markdown = $1, plan_summary = $2 WHERE workflow_id = $3",
    )
    .bind(plan_markdown)
    .bind(plan_summary)
    .bind(id)
    .execute(pool)
    .await
    .context("failed to update plan cache")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("workflow {id} not found");
    }
    Ok(())
}

/// Clear the cached plan text. Called by `replan` alongside
/// `PipelineState::clear_plan`.
pub async fn clear_plan_cache(pool: &PgPool, id: Uuid) -> Result<()> {
    sqlx::query("UPDATE workflows SET plan_markdown = NULL, plan_summary = NULL WHERE workflow_id = $1")
        .bind(id)
        .execute(pool)
        .await
        .context("failed to clear plan cache")?;
    Ok(())
}
