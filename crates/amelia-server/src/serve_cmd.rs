//! The `amelia serve` command: builds the `Orchestrator`, the `EventBus`
//! and its subscribers, the WebSocket broker, and the combined axum router,
//! then serves it with graceful shutdown (the same shape as the teacher's
//! `run_serve`, generalized from a read-only plan dashboard to the full
//! workflow wire surface of spec §4.5/§6).

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::get;
use axum::Router;
use sqlx::PgPool;
use tower_http::cors::CorsLayer;

use amelia_core::events::EventBus;
use amelia_core::pipeline::agent_hooks::NoopAgentHooks;
use amelia_core::Orchestrator;

use crate::config::AmeliaConfig;
use crate::ws::{self, WsBroker};
use crate::wire;

/// Shared state handed to every axum handler: the orchestrator (the only
/// way handlers mutate workflow state), the pool (read-path enrichment
/// queries that bypass the orchestrator's narrower command surface), and
/// the WebSocket broker (fed by the same `EventBus` the orchestrator
/// writes through).
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub pool: PgPool,
    pub ws_broker: WsBroker,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .nest("/", wire::router())
        .route("/ws/events", get(ws::ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Construct the orchestrator and its event-bus wiring: the token-usage
/// sink and the WebSocket broker both subscribe to the same `EventBus`, the
/// way the teacher's `cmd_init` wires a single `gator_core::token::guard`
/// consumer off of one event stream.
pub async fn build_app_state(pool: PgPool, config: &AmeliaConfig) -> Result<AppState> {
    let events = Arc::new(EventBus::new(pool.clone()));

    let token_sink = amelia_core::events::token_sink::TokenUsageSink::spawn(pool.clone());
    events.subscribe(token_sink.subscriber());

    let ws_broker = WsBroker::new(config.ws_queue_depth);
    events.subscribe(ws_broker.subscriber());

    let orchestrator = Orchestrator::new(
        pool.clone(),
        events,
        Arc::new(NoopAgentHooks),
        config.orchestrator.clone(),
    )
    .await
    .context("failed to construct orchestrator")?;

    Ok(AppState {
        orchestrator,
        pool,
        ws_broker,
    })
}

pub async fn run_serve(pool: PgPool, config: &AmeliaConfig, bind: &str, port: u16) -> Result<()> {
    let state = build_app_state(pool, config).await?;
    let app = build_router(state);

    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    tracing::info!("amelia serve listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("amelia serve shut down");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::json;
    use tower::ServiceExt;

    use amelia_test_utils::{create_test_db, drop_test_db};

    use super::*;

    async fn test_state(pool: PgPool) -> AppState {
        let config = AmeliaConfig::resolve(None);
        build_app_state(pool, &config).await.expect("app state should build")
    }

    async fn send_request(app: Router, req: Request<Body>) -> axum::response::Response {
        app.oneshot(req).await.expect("request should complete")
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should read");
        serde_json::from_slice(&bytes).expect("body should be json")
    }

    #[tokio::test]
    async fn create_then_get_workflow_round_trips() {
        let (pool, db_name) = create_test_db().await;
        let app = build_router(test_state(pool.clone()).await);

        let create_body = json!({
            "issue_id": "ISSUE-1",
            "issue_title": "fix the thing",
            "issue_description": "the thing is broken",
            "worktree_path": "/tmp/amelia/issue-1",
            "mode": "pending",
        });
        let create_req = Request::builder()
            .method("POST")
            .uri("/workflows")
            .header("content-type", "application/json")
            .body(Body::from(create_body.to_string()))
            .expect("request should build");
        let create_resp = send_request(app.clone(), create_req).await;
        assert_eq!(create_resp.status(), StatusCode::CREATED);
        let created = body_json(create_resp).await;
        let workflow_id = created["workflow_id"].as_str().expect("workflow_id should be a string");

        let get_req = Request::builder()
            .uri(format!("/workflows/{workflow_id}"))
            .body(Body::empty())
            .expect("request should build");
        let get_resp = send_request(app, get_req).await;
        assert_eq!(get_resp.status(), StatusCode::OK);
        let detail = body_json(get_resp).await;
        assert_eq!(detail["issue_id"], "ISSUE-1");
        assert_eq!(detail["status"], "pending");
        assert!(detail.get("recent_events").is_some());

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn create_workflow_rejects_invalid_issue_id() {
        let (pool, db_name) = create_test_db().await;
        let app = build_router(test_state(pool.clone()).await);

        let create_body = json!({
            "issue_id": "../etc/passwd",
            "issue_title": "x",
            "issue_description": "x",
            "worktree_path": "/tmp/amelia/issue-2",
        });
        let req = Request::builder()
            .method("POST")
            .uri("/workflows")
            .header("content-type", "application/json")
            .body(Body::from(create_body.to_string()))
            .expect("request should build");
        let resp = send_request(app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let json = body_json(resp).await;
        assert_eq!(json["code"], "VALIDATION_ERROR");

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn get_unknown_workflow_is_not_found() {
        let (pool, db_name) = create_test_db().await;
        let app = build_router(test_state(pool.clone()).await);

        let random_id = uuid::Uuid::new_v4();
        let req = Request::builder()
            .uri(format!("/workflows/{random_id}"))
            .body(Body::empty())
            .expect("request should build");
        let resp = send_request(app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let json = body_json(resp).await;
        assert_eq!(json["code"], "NOT_FOUND");

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn list_workflows_returns_created_rows() {
        let (pool, db_name) = create_test_db().await;
        let app = build_router(test_state(pool.clone()).await);

        for n in 0..3 {
            let create_body = json!({
                "issue_id": format!("ISSUE-{n}"),
                "issue_title": "t",
                "issue_description": "d",
                "worktree_path": format!("/tmp/amelia/issue-{n}"),
                "mode": "pending",
            });
            let req = Request::builder()
                .method("POST")
                .uri("/workflows")
                .header("content-type", "application/json")
                .body(Body::from(create_body.to_string()))
                .expect("request should build");
            let resp = send_request(app.clone(), req).await;
            assert_eq!(resp.status(), StatusCode::CREATED);
        }

        let req = Request::builder()
            .uri("/workflows")
            .body(Body::empty())
            .expect("request should build");
        let resp = send_request(app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["items"].as_array().expect("items should be an array").len(), 3);

        pool.close().await;
        drop_test_db(&db_name).await;
    }
}
