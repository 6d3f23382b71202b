//! Integration tests for workflow CRUD and the status state machine's
//! optimistic-lock transition query.

use amelia_db::models::{PipelineState, WorkflowStatus};
use amelia_db::pool;
use amelia_db::queries::workflows::{self, NewWorkflow};
use amelia_test_utils::{create_test_db, drop_test_db};
use uuid::Uuid;

async fn migrated_db() -> (sqlx::PgPool, String) {
    let (pool, db_name) = create_test_db().await;
    (pool, db_name)
}

fn new_workflow(issue_id: &str, worktree_path: &str) -> NewWorkflow {
    let workflow_id = Uuid::new_v4();
    NewWorkflow {
        workflow_id,
        issue_id: issue_id.to_owned(),
        worktree_path: worktree_path.to_owned(),
        worktree_name: None,
        profile_name: Some("default".to_owned()),
        status: WorkflowStatus::Pending,
        pipeline_state: PipelineState::new(
            workflow_id,
            Some("default".to_owned()),
            "Fix the bug".to_owned(),
            "details".to_owned(),
            Some(issue_id.to_owned()),
            5,
        ),
    }
}

#[tokio::test]
async fn insert_and_get_workflow() {
    let (db, db_name) = migrated_db().await;

    let created = workflows::create(&db, &new_workflow("A-1", "/tmp/r1"))
        .await
        .expect("create should succeed");

    assert_eq!(created.issue_id, "A-1");
    assert_eq!(created.status, WorkflowStatus::Pending);
    assert!(created.started_at.is_none());

    let fetched = workflows::get(&db, created.workflow_id)
        .await
        .expect("get should succeed")
        .expect("workflow should exist");
    assert_eq!(fetched.workflow_id, created.workflow_id);

    db.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn get_returns_none_for_missing_id() {
    let (db, db_name) = migrated_db().await;

    let result = workflows::get(&db, Uuid::new_v4())
        .await
        .expect("get should not error");
    assert!(result.is_none());

    db.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn worktree_exclusion_lookup_ignores_terminal_workflows() {
    let (db, db_name) = migrated_db().await;

    let created = workflows::create(&db, &new_workflow("A-1", "/tmp/shared"))
        .await
        .unwrap();

    let found = workflows::get_by_worktree(&db, "/tmp/shared")
        .await
        .unwrap();
    assert_eq!(found.unwrap().workflow_id, created.workflow_id);

    workflows::transition_status(
        &db,
        created.workflow_id,
        WorkflowStatus::Pending,
        WorkflowStatus::Cancelled,
        None,
    )
    .await
    .unwrap();

    let found_after_cancel = workflows::get_by_worktree(&db, "/tmp/shared")
        .await
        .unwrap();
    assert!(
        found_after_cancel.is_none(),
        "a cancelled workflow must not hold the worktree"
    );

    db.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn transition_status_is_optimistically_locked() {
    let (db, db_name) = migrated_db().await;

    let created = workflows::create(&db, &new_workflow("A-1", "/tmp/r1"))
        .await
        .unwrap();

    let rows = workflows::transition_status(
        &db,
        created.workflow_id,
        WorkflowStatus::Pending,
        WorkflowStatus::Planning,
        None,
    )
    .await
    .unwrap();
    assert_eq!(rows, 1);

    // Trying the same `from` again fails because the row already moved on.
    let rows_again = workflows::transition_status(
        &db,
        created.workflow_id,
        WorkflowStatus::Pending,
        WorkflowStatus::Planning,
        None,
    )
    .await
    .unwrap();
    assert_eq!(rows_again, 0);

    let current = workflows::get(&db, created.workflow_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(current.status, WorkflowStatus::Planning);

    db.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn transition_to_terminal_stamps_completed_at() {
    let (db, db_name) = migrated_db().await;

    let created = workflows::create(&db, &new_workflow("A-1", "/tmp/r1"))
        .await
        .unwrap();
    workflows::transition_status(
        &db,
        created.workflow_id,
        WorkflowStatus::Pending,
        WorkflowStatus::Failed,
        Some("architect crashed"),
    )
    .await
    .unwrap();

    let failed = workflows::get(&db, created.workflow_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failed.status, WorkflowStatus::Failed);
    assert_eq!(failed.failure_reason.as_deref(), Some("architect crashed"));
    assert!(failed.completed_at.is_some());

    db.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn list_active_excludes_terminal_workflows() {
    let (db, db_name) = migrated_db().await;

    let active = workflows::create(&db, &new_workflow("A-1", "/tmp/a")).await.unwrap();
    let terminal = workflows::create(&db, &new_workflow("A-2", "/tmp/b")).await.unwrap();
    workflows::transition_status(
        &db,
        terminal.workflow_id,
        WorkflowStatus::Pending,
        WorkflowStatus::Cancelled,
        None,
    )
    .await
    .unwrap();

    let listed = workflows::list_active(&db).await.unwrap();
    let ids: Vec<Uuid> = listed.iter().map(|w| w.workflow_id).collect();
    assert!(ids.contains(&active.workflow_id));
    assert!(!ids.contains(&terminal.workflow_id));

    let count = workflows::count_active(&db).await.unwrap();
    assert_eq!(count, 1);

    db.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn update_plan_cache_roundtrips() {
    let (db, db_name) = migrated_db().await;

    let created = workflows::create(&db, &new_workflow("A-1", "/tmp/r1")).await.unwrap();
    workflows::update_plan_cache(&db, created.workflow_id, "# Plan\n1. do thing", "one step")
        .await
        .unwrap();

    let fetched = workflows::get(&db, created.workflow_id).await.unwrap().unwrap();
    assert_eq!(fetched.plan_markdown.as_deref(), Some("# Plan\n1. do thing"));
    assert_eq!(fetched.plan_summary.as_deref(), Some("one step"));

    workflows::clear_plan_cache(&db, created.workflow_id).await.unwrap();
    let cleared = workflows::get(&db, created.workflow_id).await.unwrap().unwrap();
    assert!(cleared.plan_markdown.is_none());
    assert!(cleared.plan_summary.is_none());

    db.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn list_paginates_with_cursor() {
    let (db, db_name) = migrated_db().await;

    for i in 0..5 {
        workflows::create(&db, &new_workflow(&format!("A-{i}"), &format!("/tmp/{i}")))
            .await
            .unwrap();
    }

    let page1 = workflows::list(&db, None, None, 2, None).await.unwrap();
    assert_eq!(page1.items.len(), 2);
    assert_eq!(page1.total, 5);
    assert!(page1.has_more);
    let cursor = page1.next_cursor.expect("should have a next cursor");

    let page2 = workflows::list(&db, None, None, 2, Some(&cursor)).await.unwrap();
    assert_eq!(page2.items.len(), 2);

    let page1_ids: Vec<_> = page1.items.iter().map(|w| w.workflow_id).collect();
    let page2_ids: Vec<_> = page2.items.iter().map(|w| w.workflow_id).collect();
    assert!(page1_ids.iter().all(|id| !page2_ids.contains(id)));

    db.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn default_migrations_path_resolves() {
    // Sanity check used implicitly by create_test_db; asserted explicitly
    // here so a misconfigured CARGO_MANIFEST_DIR fails loudly.
    let path = pool::default_migrations_path();
    assert!(path.ends_with("migrations"));
}
