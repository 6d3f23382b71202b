//! Database query functions for the `workflow_events` table.
//!
//! Ephemeral event types ([`EventType::is_ephemeral`]) never reach these
//! functions — the event persister subscriber filters them out before
//! calling [`append`].

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{EventType, WorkflowEvent};

/// Parameters for appending a new persisted event.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub workflow_id: Uuid,
    pub event_type: EventType,
    pub agent: String,
    pub message: String,
    pub data: Value,
}

/// Append an event, assigning it the next `sequence` for its `workflow_id`
/// atomically: the `INSERT ... SELECT` computes `COALESCE(MAX(sequence), 0) +
/// 1` in the same statement that performs the insert, so a concurrent writer
/// observes either the row before or after this one, never a gap or a
/// duplicate (spec §4.2, §5).
///
/// A unique index on `(workflow_id, sequence)` turns any residual race
/// (there should be at most one writer per workflow in normal operation)
/// into a unique-violation, which this function retries by recomputing
/// `MAX(sequence)` from scratch, up to `MAX_APPEND_ATTEMPTS` times.
pub async fn append(pool: &PgPool, new: &NewEvent) -> Result<WorkflowEvent> {
    const MAX_APPEND_ATTEMPTS: u32 = 5;

    debug_assert!(
        !new.event_type.is_ephemeral(),
        "ephemeral event types must not be persisted: {:?}",
        new.event_type
    );

    for attempt in 1..=MAX_APPEND_ATTEMPTS {
        let result = sqlx::query_as::<_, WorkflowEvent>(
            "INSERT INTO workflow_events (event_id, workflow_id, sequence, timestamp, event_type, agent, message, data) \
             SELECT $1, $2, COALESCE(MAX(sequence), 0) + 1, NOW(), $3, $4, $5, $6 \
             FROM workflow_events WHERE workflow_id = $2 \
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(new.workflow_id)
        .bind(new.event_type)
        .bind(&new.agent)
        .bind(&new.message)
        .bind(sqlx::types::Json(&new.data))
        .fetch_one(pool)
        .await;

        match result {
            Ok(event) => return Ok(event),
            Err(sqlx::Error::Database(db_err))
                if db_err.code().as_deref() == Some("23505") && attempt < MAX_APPEND_ATTEMPTS =>
            {
                tracing::warn!(
                    workflow_id = %new.workflow_id,
                    attempt,
                    "sequence collision appending event, retrying"
                );
                continue;
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to append event for workflow {}", new.workflow_id)
                });
            }
        }
    }

    unreachable!("loop always returns on its final attempt")
}

/// Most recent `limit` persisted events for a workflow, newest first.
pub async fn get_recent(pool: &PgPool, workflow_id: Uuid, limit: i64) -> Result<Vec<WorkflowEvent>> {
    let events = sqlx::query_as::<_, WorkflowEvent>(
        "SELECT * FROM workflow_events \
         WHERE workflow_id = $1 \
         ORDER BY sequence DESC \
         LIMIT $2",
    )
    .bind(workflow_id)
    .bind(limit)
    .fetch_all(pool)
    .await
    .with_context(|| format!("failed to fetch recent events for workflow {workflow_id}"))?;

    Ok(events)
}

/// All persisted events with `sequence > after_sequence`, ascending. This is
/// the backfill query used both by WebSocket replay-on-subscribe and by the
/// `GET /workflows/{id}/events?after_sequence=N` endpoint.
pub async fn get_since(
    pool: &PgPool,
    workflow_id: Uuid,
    after_sequence: i64,
) -> Result<Vec<WorkflowEvent>> {
    let events = sqlx::query_as::<_, WorkflowEvent>(
        "SELECT * FROM workflow_events \
         WHERE workflow_id = $1 AND sequence > $2 \
         ORDER BY sequence ASC",
    )
    .bind(workflow_id)
    .bind(after_sequence)
    .fetch_all(pool)
    .await
    .with_context(|| format!("failed to fetch events since {after_sequence} for workflow {workflow_id}"))?;

    Ok(events)
}

/// The highest assigned sequence for a workflow, or 0 if it has no events
/// yet. Used to validate invariant 1 (contiguous sequences) in tests.
pub async fn get_max_sequence(pool: &PgPool, workflow_id: Uuid) -> Result<i64> {
    let row: (Option<i64>,) =
        sqlx::query_as("SELECT MAX(sequence) FROM workflow_events WHERE workflow_id = $1")
            .bind(workflow_id)
            .fetch_one(pool)
            .await
            .with_context(|| format!("failed to get max sequence for workflow {workflow_id}"))?;

    Ok(row.0.unwrap_or(0))
}
