//! Database query functions for the checkpoint store.
//!
//! Logically separate from the application DB (spec §2, §3): three tables —
//! `checkpoints`, `checkpoint_writes`, `checkpoint_blobs` — keyed by
//! `thread_id`, which for this implementation is always a workflow's
//! `workflow_id`. A `replan` purges a thread's checkpoints without touching
//! `workflows` or `workflow_events`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

/// A checkpoint row: the pipeline engine's "next node" pointer (or interrupt
/// marker) plus the full state-bag snapshot, loaded together as one unit.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CheckpointRecord {
    pub checkpoint_id: Uuid,
    pub thread_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub next_node: Option<String>,
    pub interrupt_kind: Option<String>,
    pub state: sqlx::types::Json<Value>,
}

/// A single pending write recorded alongside a checkpoint: the delta field
/// name and the value written to it. Kept for audit/debugging; the engine
/// itself only needs `CheckpointRecord::state`, already merged.
#[derive(Debug, Clone)]
pub struct PendingWrite {
    pub channel: String,
    pub value: Value,
}

/// Insert a new checkpoint. Checkpoints are immutable — a new transition
/// always produces a new row, never an update (spec §4.3).
pub async fn save(
    pool: &PgPool,
    thread_id: Uuid,
    state: &Value,
    next_node: Option<&str>,
    interrupt_kind: Option<&str>,
    writes: &[PendingWrite],
) -> Result<Uuid> {
    let checkpoint_id = Uuid::new_v4();

    let mut tx = pool
        .begin()
        .await
        .context("failed to begin checkpoint transaction")?;

    sqlx::query(
        "INSERT INTO checkpoints (checkpoint_id, thread_id, created_at, next_node, interrupt_kind) \
         VALUES ($1, $2, NOW(), $3, $4)",
    )
    .bind(checkpoint_id)
    .bind(thread_id)
    .bind(next_node)
    .bind(interrupt_kind)
    .execute(&mut *tx)
    .await
    .context("failed to insert checkpoint")?;

    sqlx::query("INSERT INTO checkpoint_blobs (checkpoint_id, state) VALUES ($1, $2)")
        .bind(checkpoint_id)
        .bind(sqlx::types::Json(state))
        .execute(&mut *tx)
        .await
        .context("failed to insert checkpoint blob")?;

    for write in writes {
        sqlx::query(
            "INSERT INTO checkpoint_writes (id, checkpoint_id, channel, value) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(Uuid::new_v4())
        .bind(checkpoint_id)
        .bind(&write.channel)
        .bind(sqlx::types::Json(&write.value))
        .execute(&mut *tx)
        .await
        .context("failed to insert checkpoint write")?;
    }

    tx.commit().await.context("failed to commit checkpoint")?;

    Ok(checkpoint_id)
}

/// Load the most recent checkpoint for a thread, if any.
pub async fn load_latest(pool: &PgPool, thread_id: Uuid) -> Result<Option<CheckpointRecord>> {
    let record = sqlx::query_as::<_, CheckpointRecord>(
        "SELECT c.checkpoint_id, c.thread_id, c.created_at, c.next_node, c.interrupt_kind, b.state \
         FROM checkpoints c \
         JOIN checkpoint_blobs b ON b.checkpoint_id = c.checkpoint_id \
         WHERE c.thread_id = $1 \
         ORDER BY c.created_at DESC \
         LIMIT 1",
    )
    .bind(thread_id)
    .fetch_optional(pool)
    .await
    .with_context(|| format!("failed to load latest checkpoint for thread {thread_id}"))?;

    Ok(record)
}

/// Delete every checkpoint (and its blobs/writes, via `ON DELETE CASCADE`)
/// for a thread. Used by `replan` (spec §4.4) and by explicit admin cleanup.
pub async fn delete_all(pool: &PgPool, thread_id: Uuid) -> Result<u64> {
    let result = sqlx::query("DELETE FROM checkpoints WHERE thread_id = $1")
        .bind(thread_id)
        .execute(pool)
        .await
        .with_context(|| format!("failed to delete checkpoints for thread {thread_id}"))?;

    Ok(result.rows_affected())
}
