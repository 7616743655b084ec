//! Task store against on-disk SQLite

use orchestrator::db::{DatabaseConnection, DatabaseError, StepRepository, StepStatus, TaskRepository, TransitionUpdate};
use orchestrator::{NewTask, TaskContract, TaskResult, TaskStatus};
use serde_json::json;

async fn open(dir: &tempfile::TempDir) -> DatabaseConnection {
    let url = format!("sqlite://{}", dir.path().join("store.db").display());
    DatabaseConnection::open(&url, 4).await.unwrap()
}

fn task(goal: &str) -> TaskContract {
    TaskContract::accept(NewTask::new(goal).with_capability("code").with_criterion("done"), Some("alice".into())).unwrap()
}

#[tokio::test]
async fn test_contract_survives_reconnect() {
    let dir = tempfile::tempdir().unwrap();
    let original = task("Persist me");
    {
        let db = open(&dir).await;
        TaskRepository::create(db.pool(), &original).await.unwrap();
        db.close().await;
    }

    let db = open(&dir).await;
    let loaded = TaskRepository::get(db.pool(), original.task_id).await.unwrap().unwrap();
    assert_eq!(loaded.goal, original.goal);
    assert_eq!(loaded.required_capabilities, original.required_capabilities);
    assert_eq!(loaded.owner.as_deref(), Some("alice"));
    assert_eq!(loaded.status, TaskStatus::Pending);
    assert_eq!(
        TaskRepository::list_non_terminal(db.pool()).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn test_concurrent_transitions_have_one_winner() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir).await;
    let t = task("Race me");
    TaskRepository::create(db.pool(), &t).await.unwrap();

    let advance_update = TransitionUpdate::default();
    let cancel_update = TransitionUpdate::reason("Cancelled: cancelled by request");
    let advance = TaskRepository::transition(
        db.pool(),
        t.task_id,
        TaskStatus::Pending,
        TaskStatus::Preprocessing,
        &advance_update,
    );
    let cancel = TaskRepository::transition(
        db.pool(),
        t.task_id,
        TaskStatus::Pending,
        TaskStatus::Cancelled,
        &cancel_update,
    );
    let (advanced, cancelled) = tokio::join!(advance, cancel);
    assert!(advanced.unwrap() ^ cancelled.unwrap());

    // One row at submission plus the single winning transition
    let log = TaskRepository::transitions(db.pool(), t.task_id).await.unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].from_status, None);
    assert_eq!(log[1].from_status.as_deref(), Some("pending"));
}

#[tokio::test]
async fn test_result_and_steps_are_stored() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir).await;
    let pool = db.pool();
    let t = task("Finish me");
    TaskRepository::create(pool, &t).await.unwrap();

    StepRepository::mark_dispatched(pool, t.task_id, 0, "coder").await.unwrap();
    StepRepository::mark_done(pool, t.task_id, 0, &json!({"ok": true}), 12, 0.2, &["done".to_string()])
        .await
        .unwrap();
    // A late failure report never overwrites a finished step
    StepRepository::mark_failed(pool, t.task_id, 0, "UpstreamTimeoutError: late").await.unwrap();

    let steps = StepRepository::list(pool, t.task_id).await.unwrap();
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].status, StepStatus::Done);
    assert_eq!(steps[0].criteria_met, vec!["done".to_string()]);

    let path = [
        TaskStatus::Pending,
        TaskStatus::Preprocessing,
        TaskStatus::Routed,
        TaskStatus::Executing,
        TaskStatus::Integrating,
    ];
    for pair in path.windows(2) {
        assert!(TaskRepository::transition(pool, t.task_id, pair[0], pair[1], &TransitionUpdate::default())
            .await
            .unwrap());
    }
    let result = TaskResult {
        output: json!({"ok": true}),
        criteria_met: vec!["done".into()],
        tokens_used: 12,
        cost_units: 0.2,
    };
    assert!(TaskRepository::transition(
        pool,
        t.task_id,
        TaskStatus::Integrating,
        TaskStatus::Completed,
        &TransitionUpdate::result(result.clone()),
    )
    .await
    .unwrap());

    let stored = TaskRepository::get(pool, t.task_id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Completed);
    assert_eq!(stored.result, Some(result));

    let counts = TaskRepository::count_by_status(pool).await.unwrap();
    assert_eq!(counts, vec![(TaskStatus::Completed, 1)]);
    assert!(TaskRepository::list_non_terminal(pool).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_skipped_transition_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir).await;
    let pool = db.pool();
    let t = task("Skip ahead");
    TaskRepository::create(pool, &t).await.unwrap();

    for (from, to) in [
        (TaskStatus::Pending, TaskStatus::Preprocessing),
        (TaskStatus::Preprocessing, TaskStatus::Routed),
    ] {
        assert!(TaskRepository::transition(pool, t.task_id, from, to, &TransitionUpdate::default())
            .await
            .unwrap());
    }

    let err = TaskRepository::transition(
        pool,
        t.task_id,
        TaskStatus::Routed,
        TaskStatus::Completed,
        &TransitionUpdate::default(),
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err,
        DatabaseError::InvalidTransition {
            from: TaskStatus::Routed,
            to: TaskStatus::Completed
        }
    ));

    let stored = TaskRepository::get(pool, t.task_id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Routed);
    assert_eq!(TaskRepository::transitions(pool, t.task_id).await.unwrap().len(), 3);
}
