//! The token usage sink: a mandatory [`EventBus`](super::EventBus)
//! subscriber that folds every `TokenUsageUpdated` event into the running
//! per-agent totals in `token_usage` (spec §3, §4.1).
//!
//! The subscriber closure itself never touches the database — it parses
//! the event and forwards a [`TokenDelta`] onto an internally-owned
//! channel, and a background task drains that channel and performs the
//! actual `INSERT ... ON CONFLICT DO UPDATE`. This keeps `EventBus::emit`
//! from blocking on a database round trip for every agent turn.

use std::sync::Arc;

use sqlx::PgPool;
use tokio::sync::mpsc;
use uuid::Uuid;

use amelia_db::models::{EventType, WorkflowEvent};

use super::Subscriber;

#[derive(Debug, Clone)]
struct TokenDelta {
    workflow_id: Uuid,
    agent: String,
    input_tokens: i64,
    output_tokens: i64,
    estimated_cost_usd: f64,
}

/// Owns the background task that persists token usage deltas. Dropping
/// this stops the background task once the channel drains and closes.
pub struct TokenUsageSink {
    tx: mpsc::Sender<TokenDelta>,
}

impl TokenUsageSink {
    /// Spawn the background persister and return the sink. Call
    /// [`TokenUsageSink::subscriber`] to get the closure to register with
    /// an [`EventBus`](super::EventBus).
    pub fn spawn(pool: PgPool) -> Self {
        let (tx, mut rx) = mpsc::channel::<TokenDelta>(1024);

        tokio::spawn(async move {
            while let Some(delta) = rx.recv().await {
                let result = amelia_db::queries::token_usage::increment(
                    &pool,
                    delta.workflow_id,
                    &delta.agent,
                    delta.input_tokens,
                    delta.output_tokens,
                    delta.estimated_cost_usd,
                )
                .await;
                if let Err(err) = result {
                    tracing::error!(
                        workflow_id = %delta.workflow_id,
                        agent = %delta.agent,
                        "failed to persist token usage: {err:#}"
                    );
                }
            }
        });

        Self { tx }
    }

    /// The `EventBus` subscriber closure. Ignores every event type except
    /// `TokenUsageUpdated`, and ignores malformed payloads rather than
    /// panicking — a bad payload should not take down the whole sink.
    pub fn subscriber(&self) -> Subscriber {
        let tx = self.tx.clone();
        Arc::new(move |event: &WorkflowEvent| {
            if event.event_type != EventType::TokenUsageUpdated {
                return;
            }
            let Some(delta) = parse_delta(event) else {
                tracing::warn!(
                    workflow_id = %event.workflow_id,
                    "TokenUsageUpdated event had an unparseable payload"
                );
                return;
            };
            if let Err(err) = tx.try_send(delta) {
                tracing::warn!(
                    workflow_id = %event.workflow_id,
                    "dropping token usage delta, sink queue full: {err}"
                );
            }
        })
    }
}

fn parse_delta(event: &WorkflowEvent) -> Option<TokenDelta> {
    let data = &event.data.0;
    Some(TokenDelta {
        workflow_id: event.workflow_id,
        agent: event.agent.clone(),
        input_tokens: data.get("input_tokens")?.as_i64()?,
        output_tokens: data.get("output_tokens")?.as_i64()?,
        estimated_cost_usd: data.get("estimated_cost_usd").and_then(|v| v.as_f64()).unwrap_or(0.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventBus, EventDraft};
    use serde_json::json;

    #[tokio::test]
    async fn token_usage_updated_events_accumulate() {
        let (pool, db_name) = amelia_test_utils::create_test_db().await;
        let bus = EventBus::new(pool.clone());
        let sink = TokenUsageSink::spawn(pool.clone());
        bus.subscribe(sink.subscriber());

        let workflow_id = amelia_test_utils::seed_workflow(&pool).await;

        bus.emit(
            EventDraft::new(workflow_id, EventType::TokenUsageUpdated, "developer", "turn 1")
                .with_data(json!({"input_tokens": 100, "output_tokens": 50, "estimated_cost_usd": 0.01})),
        )
        .await
        .unwrap();
        bus.emit(
            EventDraft::new(workflow_id, EventType::TokenUsageUpdated, "developer", "turn 2")
                .with_data(json!({"input_tokens": 10, "output_tokens": 5, "estimated_cost_usd": 0.001})),
        )
        .await
        .unwrap();

        // The sink persists asynchronously via its own channel; give the
        // background task a moment to drain before asserting.
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;

        let rows = amelia_db::queries::token_usage::get_for_workflow(&pool, workflow_id)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].agent, "developer");
        assert_eq!(rows[0].input_tokens, 110);
        assert_eq!(rows[0].output_tokens, 55);

        pool.close().await;
        amelia_test_utils::drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn ignores_unrelated_event_types() {
        let (pool, db_name) = amelia_test_utils::create_test_db().await;
        let bus = EventBus::new(pool.clone());
        let sink = TokenUsageSink::spawn(pool.clone());
        bus.subscribe(sink.subscriber());

        let workflow_id = amelia_test_utils::seed_workflow(&pool).await;
        bus.emit(EventDraft::new(workflow_id, EventType::WorkflowCreated, "orchestrator", "created"))
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let rows = amelia_db::queries::token_usage::get_for_workflow(&pool, workflow_id)
            .await
            .unwrap();
        assert!(rows.is_empty());

        pool.close().await;
        amelia_test_utils::drop_test_db(&db_name).await;
    }
}
