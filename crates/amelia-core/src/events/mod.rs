//! In-process publish/subscribe for workflow events (spec §4.1).
//!
//! Design decision (see `DESIGN.md`): the Python source's "synchronous
//! emit" is reinterpreted for async Rust as *sequential, awaited* rather
//! than *blocking*. Persistence is not a generic subscriber you could
//! unregister — it is `EventBus`'s own authoritative step, run first, so
//! every other subscriber (token sink, WebSocket broker, telemetry hook)
//! always observes a fully-sequenced [`WorkflowEvent`]. Those downstream
//! subscribers remain the cheap, synchronous closures the spec describes:
//! anything needing I/O enqueues onto its own internal channel and does
//! the real work in a background task it owns, so one slow subscriber
//! cannot block `emit` for the others.

pub mod token_sink;

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use futures::FutureExt;
use sqlx::PgPool;
use uuid::Uuid;

use amelia_db::models::{EventType, WorkflowEvent};
use amelia_db::queries::events::{self, NewEvent};

use crate::errors::OrchestratorError;

/// The not-yet-persisted shape of an event, as produced by a pipeline node
/// or an orchestrator command.
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub workflow_id: Uuid,
    pub event_type: EventType,
    pub agent: String,
    pub message: String,
    pub data: serde_json::Value,
}

impl EventDraft {
    pub fn new(
        workflow_id: Uuid,
        event_type: EventType,
        agent: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            workflow_id,
            event_type,
            agent: agent.into(),
            message: message.into(),
            data: serde_json::Value::Null,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

/// A registered subscriber: a cheap, synchronous callback invoked with the
/// fully-sequenced event. Must not block — see module docs.
pub type Subscriber = std::sync::Arc<dyn Fn(&WorkflowEvent) + Send + Sync>;

/// Handle returned by [`EventBus::subscribe`], used to unregister later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Entry {
    id: SubscriptionId,
    handler: Subscriber,
}

/// The event bus. One instance per process, shared by the orchestrator and
/// every pipeline node via `Arc`.
pub struct EventBus {
    pool: PgPool,
    subscribers: Mutex<Vec<Entry>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a subscriber. Subscribers are invoked in registration order.
    pub fn subscribe(&self, handler: Subscriber) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.lock().expect("subscribers lock poisoned").push(Entry { id, handler });
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers
            .lock()
            .expect("subscribers lock poisoned")
            .retain(|entry| entry.id != id);
    }

    /// Emit an event: persist it (if non-ephemeral, assigning the next
    /// `sequence` atomically — spec §3, §4.2), then fan the final event out
    /// to every subscriber in registration order, swallowing and logging
    /// any subscriber panic so one faulty subscriber cannot disrupt others
    /// (spec §4.1).
    pub async fn emit(&self, draft: EventDraft) -> Result<WorkflowEvent, OrchestratorError> {
        let event = if draft.event_type.is_ephemeral() {
            WorkflowEvent {
                event_id: Uuid::new_v4(),
                workflow_id: draft.workflow_id,
                sequence: 0,
                timestamp: chrono::Utc::now(),
                event_type: draft.event_type,
                agent: draft.agent,
                message: draft.message,
                data: sqlx::types::Json(draft.data),
            }
        } else {
            events::append(
                &self.pool,
                &NewEvent {
                    workflow_id: draft.workflow_id,
                    event_type: draft.event_type,
                    agent: draft.agent,
                    message: draft.message,
                    data: draft.data,
                },
            )
            .await?
        };

        // Snapshot the subscriber list so a handler that subscribes/
        // unsubscribes doesn't deadlock on the mutex.
        let handlers: Vec<Subscriber> = {
            let guard = self.subscribers.lock().expect("subscribers lock poisoned");
            guard.iter().map(|entry| entry.handler.clone()).collect()
        };

        for handler in handlers {
            let event_ref = &event;
            let outcome = AssertUnwindSafe(async { handler(event_ref) })
                .catch_unwind()
                .await;
            if let Err(panic) = outcome {
                let reason = panic_message(&panic);
                tracing::error!(
                    workflow_id = %event.workflow_id,
                    event_type = %event.event_type,
                    "event bus subscriber panicked: {reason}"
                );
            }
        }

        Ok(event)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn draft(workflow_id: Uuid, event_type: EventType) -> EventDraft {
        EventDraft::new(workflow_id, event_type, "orchestrator", "test event")
    }

    #[tokio::test]
    async fn subscriber_panic_does_not_disrupt_others() {
        let (pool, db_name) = amelia_test_utils::create_test_db().await;
        let bus = EventBus::new(pool.clone());

        let called = Arc::new(AtomicUsize::new(0));
        let called_clone = called.clone();

        bus.subscribe(Arc::new(|_event: &WorkflowEvent| {
            panic!("boom");
        }));
        bus.subscribe(Arc::new(move |_event: &WorkflowEvent| {
            called_clone.fetch_add(1, Ordering::SeqCst);
        }));

        let workflow_id = amelia_test_utils::seed_workflow(&pool).await;
        bus.emit(draft(workflow_id, EventType::WorkflowCreated))
            .await
            .unwrap();

        assert_eq!(called.load(Ordering::SeqCst), 1);

        pool.close().await;
        amelia_test_utils::drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn ephemeral_events_are_not_persisted_and_get_no_sequence() {
        let (pool, db_name) = amelia_test_utils::create_test_db().await;
        let bus = EventBus::new(pool.clone());
        let workflow_id = amelia_test_utils::seed_workflow(&pool).await;

        let event = bus
            .emit(draft(workflow_id, EventType::AgentMessage))
            .await
            .unwrap();
        assert_eq!(event.sequence, 0);

        let max_seq = events::get_max_sequence(&pool, workflow_id).await.unwrap();
        assert_eq!(max_seq, 0);

        pool.close().await;
        amelia_test_utils::drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn persisted_events_get_contiguous_sequence() {
        let (pool, db_name) = amelia_test_utils::create_test_db().await;
        let bus = EventBus::new(pool.clone());
        let workflow_id = amelia_test_utils::seed_workflow(&pool).await;

        let e1 = bus
            .emit(draft(workflow_id, EventType::WorkflowCreated))
            .await
            .unwrap();
        let e2 = bus
            .emit(draft(workflow_id, EventType::StageStarted))
            .await
            .unwrap();
        assert_eq!(e1.sequence, 1);
        assert_eq!(e2.sequence, 2);

        pool.close().await;
        amelia_test_utils::drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn unsubscribe_stops_future_delivery() {
        let (pool, db_name) = amelia_test_utils::create_test_db().await;
        let bus = EventBus::new(pool.clone());
        let workflow_id = amelia_test_utils::seed_workflow(&pool).await;

        let called = Arc::new(AtomicUsize::new(0));
        let called_clone = called.clone();
        let id = bus.subscribe(Arc::new(move |_event: &WorkflowEvent| {
            called_clone.fetch_add(1, Ordering::SeqCst);
        }));

        bus.emit(draft(workflow_id, EventType::WorkflowCreated))
            .await
            .unwrap();
        bus.unsubscribe(id);
        bus.emit(draft(workflow_id, EventType::StageStarted))
            .await
            .unwrap();

        assert_eq!(called.load(Ordering::SeqCst), 1);

        pool.close().await;
        amelia_test_utils::drop_test_db(&db_name).await;
    }
}
