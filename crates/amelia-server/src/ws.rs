//! The `/ws/events` WebSocket broker (spec §4.5), grounded in
//! `boternity-api::http::handlers::ws`'s upgrade-and-select shape but
//! generalized from "one global event stream" to per-connection
//! subscription sets with replay-on-subscribe, since the teacher itself has
//! no WebSocket surface to start from.
//!
//! Not a bare `tokio::broadcast` re-send: one [`broadcast::Sender`] is fed
//! by a cheap, synchronous [`EventBus`](amelia_core::events::EventBus)
//! subscriber, and each connection's own task (a) tracks which
//! `workflow_id`s it cares about, (b) replays persisted history from
//! `amelia_db::queries::events::get_since` before resuming live forwarding
//! on a subscribe, (c) filters every live broadcast receive against that
//! set, and (d) turns a [`broadcast::error::RecvError::Lagged`] into an
//! explicit `resync_required` frame instead of silently dropping events.

use std::collections::HashSet;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use amelia_db::models::WorkflowEvent;
use amelia_db::queries::events;

use crate::AppState;

/// Feeds `tx` from an `EventBus` subscriber closure. Cloning is cheap
/// (`broadcast::Sender` is itself `Arc`-backed); the orchestrator's
/// `EventBus::subscribe` is handed [`Self::subscriber`].
#[derive(Clone)]
pub struct WsBroker {
    tx: broadcast::Sender<WorkflowEvent>,
}

impl WsBroker {
    pub fn new(queue_depth: usize) -> Self {
        let (tx, _rx) = broadcast::channel(queue_depth);
        Self { tx }
    }

    /// The `EventBus` subscriber closure: never blocks, never touches I/O.
    /// A full channel only drops the *oldest* buffered event for the
    /// slowest receiver (`broadcast`'s own lag semantics) — it never holds
    /// up `EventBus::emit`.
    pub fn subscriber(&self) -> amelia_core::events::Subscriber {
        let tx = self.tx.clone();
        std::sync::Arc::new(move |event: &WorkflowEvent| {
            let _ = tx.send(event.clone());
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.tx.subscribe()
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientCommand {
    Subscribe { workflow_id: Uuid },
    Unsubscribe { workflow_id: Uuid },
}

#[derive(Debug, Serialize)]
struct EventFrame<'a> {
    r#type: &'static str,
    #[serde(flatten)]
    event: &'a WorkflowEvent,
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut events_rx = state.ws_broker.subscribe();
    let mut subscribed: HashSet<Uuid> = HashSet::new();

    loop {
        tokio::select! {
            live = events_rx.recv() => {
                match live {
                    Ok(event) => {
                        if !subscribed.contains(&event.workflow_id) {
                            continue;
                        }
                        if send_event(&mut sender, &event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "ws connection lagged, signaling resync");
                        for workflow_id in subscribed.iter().copied().collect::<Vec<_>>() {
                            if send_resync_required(&mut sender, workflow_id).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_message(&text, &state, &mut sender, &mut subscribed).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        tracing::debug!("ws receive error: {err}");
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

async fn handle_client_message(
    text: &str,
    state: &AppState,
    sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    subscribed: &mut HashSet<Uuid>,
) {
    let command: ClientCommand = match serde_json::from_str(text) {
        Ok(cmd) => cmd,
        Err(err) => {
            tracing::warn!(raw = %text, error = %err, "ignoring malformed ws command");
            return;
        }
    };

    match command {
        ClientCommand::Subscribe { workflow_id } => {
            match events::get_since(&state.pool, workflow_id, 0).await {
                Ok(backfill) => {
                    for event in &backfill {
                        if send_event(sender, event).await.is_err() {
                            return;
                        }
                    }
                    subscribed.insert(workflow_id);
                }
                Err(err) => {
                    tracing::warn!(%workflow_id, "failed to load backfill for subscribe: {err:#}");
                }
            }
        }
        ClientCommand::Unsubscribe { workflow_id } => {
            subscribed.remove(&workflow_id);
        }
    }
}

async fn send_event(
    sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    event: &WorkflowEvent,
) -> Result<(), axum::Error> {
    let frame = EventFrame { r#type: "event", event };
    match serde_json::to_string(&frame) {
        Ok(json) => sender.send(Message::Text(json.into())).await,
        Err(err) => {
            tracing::warn!("failed to serialize workflow event: {err}");
            Ok(())
        }
    }
}

async fn send_resync_required(
    sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    workflow_id: Uuid,
) -> Result<(), axum::Error> {
    let frame = serde_json::json!({ "type": "resync_required", "workflow_id": workflow_id });
    sender.send(Message::Text(frame.to_string().into())).await
}
